fn main() {
    // Only bare-metal AArch64 builds link with the kernel layout script;
    // host builds (unit tests) use the default linker setup.
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.starts_with("aarch64") && target.ends_with("none") {
        let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
        println!("cargo:rustc-link-arg=-T{}/kernel.ld", manifest_dir);
    }

    println!("cargo:rerun-if-changed=kernel.ld");
}
