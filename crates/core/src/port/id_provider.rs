// ID Provider Port (for deterministic testing)

use uuid::Uuid;

/// ID provider interface (allows deterministic journal row IDs in tests)
pub trait IdProvider: Send + Sync {
    /// Generate a new unique journal row ID
    fn generate_id(&self) -> Uuid;
}

/// UUID v4 provider (production)
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}
