fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Oboe is built against libc++_shared; link it explicitly so symbols like
    // __cxa_pure_virtual resolve on every Android ABI.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("android") {
        println!("cargo:rustc-link-lib=c++_shared");
    }
}
