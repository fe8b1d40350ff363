use tracing::{info, warn};

use crate::store::{Capability, FeedbackStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePath {
    Atomic,
    Compensating,
}

/// Decided once per process, never per request.
pub async fn select_path(
    store: &dyn FeedbackStore,
    prefer_atomic: bool,
) -> Result<WritePath, StoreError> {
    if !prefer_atomic {
        info!("Atomic writes disabled by configuration, using compensating writes");
        return Ok(WritePath::Compensating);
    }

    match store.probe().await? {
        Capability::Supported => {
            info!(backend = store.backend_tag(), "Atomic units supported");
            Ok(WritePath::Atomic)
        }
        Capability::Unsupported => {
            warn!(
                backend = store.backend_tag(),
                "Atomic units unsupported, using compensating writes"
            );
            Ok(WritePath::Compensating)
        }
    }
}
