use uuid::Uuid;

/// Mints identifiers for conversations and reports.
pub trait IdGenerator: Send + Sync {
    fn mint(&self) -> String;
}

/// Random v4 UUIDs; concurrent requests never share an identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn mint(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
