use serde::{Deserialize, Serialize};

/// User-editable identity profile. Cryptographic keys never live here; only
/// display metadata an operator might want to hand-edit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub display_name: Option<String>,
    pub contact_email: Option<String>,
    pub organization: Option<String>,
}
