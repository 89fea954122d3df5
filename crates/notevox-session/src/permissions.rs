use async_trait::async_trait;
use notevox_foundation::AppError;

/// Platform seam for capture permission prompts. Requesting may suspend on
/// an OS dialog, so the call is async.
#[async_trait]
pub trait PermissionBroker: Send + Sync {
    async fn request(&self) -> Result<(), AppError>;
}

/// Broker for hosts where capture needs no prompt (or it was granted at the
/// platform layer).
pub struct GrantedPermissions;

#[async_trait]
impl PermissionBroker for GrantedPermissions {
    async fn request(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Always-denying broker, used to exercise the denial path.
pub struct DeniedPermissions(pub String);

#[async_trait]
impl PermissionBroker for DeniedPermissions {
    async fn request(&self) -> Result<(), AppError> {
        Err(AppError::PermissionDenied(self.0.clone()))
    }
}
