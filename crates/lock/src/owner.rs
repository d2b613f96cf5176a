use uuid::Uuid;

/// Generates process-unique owner ids.
///
/// An owner id must be globally unique among the participants contending
/// for a lock; reusing one across processes silently merges their holds.
/// The generated form is `{host}-{pid}-{uuid}`, which keeps ids readable in
/// storage dumps while staying collision-free.
#[derive(Debug, Clone)]
pub struct OwnerIdGenerator {
    prefix: String,
}

impl OwnerIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| "unknown-host".to_owned());
        Self {
            prefix: format!("{host}-{}", std::process::id()),
        }
    }

    /// A fresh owner id sharing this process's prefix.
    #[must_use]
    pub fn generate(&self) -> String {
        format!("{}-{}", self.prefix, Uuid::new_v4().simple())
    }
}

impl Default for OwnerIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let generator = OwnerIdGenerator::new();
        let a = generator.generate();
        let b = generator.generate();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_share_the_process_prefix() {
        let generator = OwnerIdGenerator::new();
        let id = generator.generate();
        assert!(id.starts_with(&generator.prefix));
        assert!(!id.is_empty());
    }
}
