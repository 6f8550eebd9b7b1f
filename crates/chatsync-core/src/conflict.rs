//! Resolution of local/server disagreement on a setting

/// Decides which value wins when a push conflicts with the server.
///
/// Implementations must be pure and total: the same inputs always produce
/// the same accepted value.
pub trait ConflictResolver: Send + Sync + 'static {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Pick the value to persist
    fn resolve(&self, local: &str, server: &str) -> String;
}

/// The server copy always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerWins;

impl ConflictResolver for ServerWins {
    fn name(&self) -> &'static str {
        "server_wins"
    }

    fn resolve(&self, _local: &str, server: &str) -> String {
        server.to_string()
    }
}
