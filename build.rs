use std::env;

fn main() {
    // Scope tests resolve symbols defined in the test executable itself, which
    // requires them to be present in the dynamic symbol table.
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    match target_os.as_str() {
        "linux" | "android" | "freebsd" | "netbsd" | "openbsd" | "dragonfly" => {
            println!("cargo:rustc-link-arg-tests=-Wl,--export-dynamic");
        }
        _ => {}
    }

    println!("cargo:rerun-if-changed=build.rs");
}
