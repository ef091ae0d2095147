use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Host builds (unit tests) need none of the AVR link setup
    let target = env::var("TARGET").unwrap_or_default();
    if !target.contains("avr") {
        return;
    }

    // Configure for ATmega128
    println!("cargo:rustc-link-arg=-mmcu=atmega128");

    if env::var("PROFILE").map(|p| p == "debug").unwrap_or(false) {
        println!("cargo:rustc-cfg=feature=\"debug\"");
    }

    println!("cargo:warning=Building gateway firmware for ATmega128 at 16MHz");
}
