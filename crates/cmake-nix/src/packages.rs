/// Static mapping from CMake imported targets to nixpkgs attribute names
/// and the link flags they imply. Unknown targets map to empty strings,
/// telling callers to treat them as raw libraries.
static TARGET_PACKAGES: &[(&str, &str)] = &[
    ("Threads::Threads", ""), // provided by the compiler
    ("ZLIB::ZLIB", "zlib"),
    ("OpenGL::GL", "libGL"),
    ("OpenGL::GLU", "libGLU"),
    ("GLUT::GLUT", "freeglut"),
    ("X11::X11", "xorg.libX11"),
    ("PNG::PNG", "libpng"),
    ("JPEG::JPEG", "libjpeg"),
    ("CURL::libcurl", "curl"),
    ("OpenSSL::SSL", "openssl"),
    ("OpenSSL::Crypto", "openssl"),
    ("PkgConfig::pkgconf", "pkg-config"),
];

static TARGET_LINK_FLAGS: &[(&str, &str)] = &[
    ("Threads::Threads", "-lpthread"),
    ("ZLIB::ZLIB", "-lz"),
    ("OpenGL::GL", "-lGL"),
    ("OpenGL::GLU", "-lGLU"),
    ("GLUT::GLUT", "-lglut"),
    ("X11::X11", "-lX11"),
    ("PNG::PNG", "-lpng"),
    ("JPEG::JPEG", "-ljpeg"),
    ("CURL::libcurl", "-lcurl"),
    ("OpenSSL::SSL", "-lssl"),
    ("OpenSSL::Crypto", "-lcrypto"),
    ("PkgConfig::pkgconf", ""),
];

/// Mapping from bare find_package names, used when a raw library string
/// happens to match a known package.
static PACKAGE_NAMES: &[(&str, &str)] = &[
    ("Threads", ""),
    ("ZLIB", "zlib"),
    ("OpenGL", "libGL"),
    ("GLUT", "freeglut"),
    ("X11", "xorg.libX11"),
    ("PNG", "libpng"),
    ("JPEG", "libjpeg"),
    ("CURL", "curl"),
    ("OpenSSL", "openssl"),
    ("Boost", "boost"),
    ("Qt5", "qt5"),
    ("GTK3", "gtk3"),
    ("SDL2", "SDL2"),
    ("PkgConfig", "pkg-config"),
];

fn lookup(table: &[(&str, &str)], key: &str) -> String {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
        .unwrap_or_default()
}

/// Nix package providing an imported target; empty for unknown targets
/// and for targets the compiler provides itself.
pub fn nix_package_for_target(imported_target: &str) -> String {
    lookup(TARGET_PACKAGES, imported_target)
}

/// Link flags an imported target requires; empty when unknown.
pub fn link_flags_for_target(imported_target: &str) -> String {
    lookup(TARGET_LINK_FLAGS, imported_target)
}

/// Nix package for a bare package name.
pub fn nix_package_for_name(package: &str) -> String {
    lookup(PACKAGE_NAMES, package)
}

/// Best-effort package for a raw `-l<name>` library. The common system
/// libraries the compiler provides map to no package.
pub fn nix_package_for_library(lib: &str) -> String {
    match lib {
        "m" | "pthread" | "dl" | "rt" | "c" => String::new(),
        "z" => "zlib".to_string(),
        "ssl" | "crypto" => "openssl".to_string(),
        "curl" => "curl".to_string(),
        "png" => "libpng".to_string(),
        "jpeg" => "libjpeg".to_string(),
        "X11" => "xorg.libX11".to_string(),
        "GL" => "libGL".to_string(),
        _ => String::new(),
    }
}
