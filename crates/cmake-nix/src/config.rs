/// Build-configuration helper: maps CMake-style configuration names to
/// compiler flags. Unknown configurations get Release flags.
pub const DEFAULT_CONFIG: &str = "Release";

pub fn configuration_flags(config: &str) -> &'static str {
    match config {
        "Debug" => "-g -O0",
        "Release" => "-O3 -DNDEBUG",
        "RelWithDebInfo" => "-O2 -g -DNDEBUG",
        "MinSizeRel" => "-Os -DNDEBUG",
        _ => "-O3 -DNDEBUG",
    }
}

pub fn is_optimized(config: &str) -> bool {
    matches!(config, "Release" | "RelWithDebInfo" | "MinSizeRel")
}

pub fn has_debug_info(config: &str) -> bool {
    matches!(config, "Debug" | "RelWithDebInfo")
}

/// The configurations a multi-config generation covers by default.
pub static DEFAULT_CONFIGURATIONS: &[&str] =
    &["Debug", "Release", "RelWithDebInfo", "MinSizeRel"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        assert_eq!(configuration_flags("Debug"), "-g -O0");
        assert_eq!(configuration_flags("Release"), "-O3 -DNDEBUG");
        assert_eq!(configuration_flags("RelWithDebInfo"), "-O2 -g -DNDEBUG");
        assert_eq!(configuration_flags("MinSizeRel"), "-Os -DNDEBUG");
        assert_eq!(configuration_flags("Custom"), "-O3 -DNDEBUG");
    }

    #[test]
    fn test_predicates() {
        assert!(is_optimized("Release"));
        assert!(!is_optimized("Debug"));
        assert!(has_debug_info("Debug"));
        assert!(has_debug_info("RelWithDebInfo"));
        assert!(!has_debug_info("MinSizeRel"));
    }
}
