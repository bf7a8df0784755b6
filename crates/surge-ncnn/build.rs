#![allow(missing_docs)]
//! Build script — locate the ncnn runtime library.
//!
//! Resolution order:
//!   1. NCNN_DIR env var (root with lib/ and include/)
//!   2. common system prefixes (/usr/local, /usr)
//!
//! When no library is found the crate is built with the `surge_ncnn_stub`
//! cfg: the runtime wrapper is replaced with a stub whose extractor fails,
//! so the workspace builds and tests on hosts without ncnn installed.

use std::env;
use std::path::PathBuf;

fn candidate_lib_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(root) = env::var("NCNN_DIR") {
        let root = PathBuf::from(root);
        dirs.push(root.join("lib"));
        dirs.push(root.join("lib64"));
        dirs.push(root);
    }
    for prefix in ["/usr/local", "/usr"] {
        let prefix = PathBuf::from(prefix);
        dirs.push(prefix.join("lib"));
        dirs.push(prefix.join("lib64"));
        dirs.push(prefix.join("lib/x86_64-linux-gnu"));
    }
    dirs
}

fn has_ncnn(dir: &PathBuf) -> bool {
    ["libncnn.so", "libncnn.a", "libncnn.dylib", "ncnn.lib"]
        .iter()
        .any(|name| dir.join(name).exists())
}

fn main() {
    println!("cargo:rustc-check-cfg=cfg(surge_ncnn_stub)");
    println!("cargo:rerun-if-env-changed=NCNN_DIR");
    println!("cargo:rerun-if-changed=build.rs");

    if env::var_os("DOCS_RS").is_some() {
        println!("cargo:warning=DOCS_RS detected; building surge-ncnn in stub mode");
        println!("cargo:rustc-cfg=surge_ncnn_stub");
        return;
    }

    let Some(lib_dir) = candidate_lib_dirs().into_iter().find(has_ncnn) else {
        println!(
            "cargo:warning=libncnn not found (NCNN_DIR unset and no system install); \
             building surge-ncnn in stub mode"
        );
        println!("cargo:rustc-cfg=surge_ncnn_stub");
        return;
    };

    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=dylib=ncnn");
}
