// Namespace on the hub holding the bootstrap identity.
pub const OPEN_CLUSTER_MANAGEMENT_NAMESPACE: &str = "open-cluster-management";

// Namespace on the spoke where the registration agent runs.
pub const AGENT_NAMESPACE: &str = "open-cluster-management-agent";

// Service account whose token spoke agents use for their first contact with the hub.
pub const BOOTSTRAP_SA_NAME: &str = "cluster-bootstrap";

// Logical names of the manifests making up the bootstrap identity.
pub const BOOTSTRAP_CLUSTER_ROLE_MANIFEST: &str = "bootstrap_cluster_role";
pub const BOOTSTRAP_CLUSTER_ROLE_BINDING_MANIFEST: &str = "bootstrap_sa_cluster_role_binding";
pub const BOOTSTRAP_SA_MANIFEST: &str = "bootstrap_sa";
pub const BOOTSTRAP_TOKEN_SECRET_MANIFEST: &str = "bootstrap_sa_token";

// Logical names of the default spoke manifests.
pub const SPOKE_NAMESPACE_MANIFEST: &str = "namespace";
pub const SPOKE_AGENT_NAMESPACE_MANIFEST: &str = "namespace_agent";
pub const SPOKE_CLUSTER_ROLE_MANIFEST: &str = "cluster_role";
pub const SPOKE_CLUSTER_ROLE_BINDING_MANIFEST: &str = "cluster_role_binding";
pub const SPOKE_KLUSTERLET_CRD_MANIFEST: &str = "klusterlets.crd";
pub const SPOKE_SERVICE_ACCOUNT_MANIFEST: &str = "service_account";

// The klusterlet operator deployment. It mounts the bootstrap secret, so it is
// applied after that secret exists.
pub const SPOKE_OPERATOR_MANIFEST: &str = "operator";

// Public config map carrying the hub's connection info.
pub const CLUSTER_INFO_NAMESPACE: &str = "kube-public";
pub const CLUSTER_INFO_NAME: &str = "cluster-info";
pub const CLUSTER_INFO_KUBECONFIG_KEY: &str = "kubeconfig";

// Fixed names used in the kubeconfig handed to the spoke agent.
pub const HUB_CLUSTER_NAME: &str = "hub";
pub const BOOTSTRAP_CONTEXT_NAME: &str = "bootstrap";
pub const BOOTSTRAP_USER_NAME: &str = "bootstrap";
pub const BOOTSTRAP_CONTEXT_NAMESPACE: &str = "default";

// Label the registration agent puts on its CSRs.
pub const CLUSTER_NAME_LABEL: &str = "open-cluster-management.io/cluster-name";

// Condition types found on a CSR.
pub const CSR_APPROVED: &str = "Approved";
pub const CSR_DENIED: &str = "Denied";

// Identity recorded on the CSR approvals this tool makes.
pub const APPROVER_NAME: &str = "cluster-register";
pub const APPROVAL_REASON: &str = "ClusterRegisterApprove";

// Field manager for server side apply.
pub const FIELD_MANAGER: &str = "cluster-register";

// Secret on the spoke holding the bootstrap kubeconfig for the agent.
pub const BOOTSTRAP_HUB_KUBECONFIG_SECRET: &str = "bootstrap-hub-kubeconfig";

// Klusterlet custom resource installed on the spoke.
pub const KLUSTERLET_API_VERSION: &str = "operator.open-cluster-management.io/v1";
pub const KLUSTERLET_KIND: &str = "Klusterlet";
pub const KLUSTERLET_NAME: &str = "klusterlet";

// Default agent images referenced by the Klusterlet.
pub const DEFAULT_REGISTRATION_IMAGE: &str = "quay.io/open-cluster-management/registration:latest";
pub const DEFAULT_WORK_IMAGE: &str = "quay.io/open-cluster-management/work:latest";
