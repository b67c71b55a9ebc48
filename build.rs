#[must_use]
fn is_debug() -> bool {
    match std::env::var("PROFILE").as_deref() {
        Ok("release" | "bench") => false,
        Ok("debug") => true,
        other => panic!("unknown profile {other:?}"),
    }
}

fn main() {
    let build_profile = if is_debug() {
        "debug_build"
    } else {
        "release_build"
    };
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rustc-cfg=feature={build_profile:?}");
}
