use std::sync::OnceLock;

/// Truthy environment parse: `1/true/yes/on`, case-insensitive.
pub fn is_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

/// Whether verbose wire-framing logs are enabled (`SNI_DEBUG`), latched on
/// first use.
pub fn wire_debug() -> bool {
    static WIRE_DEBUG: OnceLock<bool> = OnceLock::new();
    *WIRE_DEBUG.get_or_init(|| is_truthy("SNI_DEBUG"))
}
