#![forbid(unsafe_code)]

use std::fmt::Display;

fn main() {
    let branch = build_data::get_git_branch().unwrap_or_else(unknown);
    let commit = build_data::get_git_commit_short().unwrap_or_else(unknown);
    let dirty = build_data::get_git_dirty()
        .map(|d| d.to_string())
        .unwrap_or_else(unknown);
    // Using the build time instead would make the build unreproducible.
    let source_ts = build_data::get_source_time()
        .map(build_data::format_timestamp)
        .unwrap_or_else(unknown);
    let rustc = build_data::get_rustc_version().unwrap_or_else(unknown);

    println!("cargo:rustc-env=GIT_BRANCH={}", branch);
    println!("cargo:rustc-env=GIT_COMMIT_SHORT={}", commit);
    println!("cargo:rustc-env=GIT_DIRTY={}", dirty);
    println!("cargo:rustc-env=SOURCE_TIMESTAMP={}", source_ts);
    println!("cargo:rustc-env=RUSTC_VERSION={}", rustc);

    // Tells cargo not to rebuild build.rs during debug builds when other files change.
    // This speeds up development builds.
    //build_data::no_debug_rebuilds();
}

// Build info is best effort so a source tree without git history still builds.
fn unknown<E: Display>(e: E) -> String {
    println!("cargo:warning=build info unavailable: {}", e);
    "unknown".to_string()
}
