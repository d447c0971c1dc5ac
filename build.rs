extern crate cc;

const PATH: &str = "src/asm";
const ASM_FILE: &str = "swap.S";
const LIB_NAME: &str = "ctxswtch";

fn main() {
    compile();
}

#[cfg(target_arch = "x86_64")]
fn compile() {
    build("x86_64");
}

#[cfg(target_arch = "aarch64")]
fn compile() {
    build("aarch64");
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn compile() {
    panic!("sco has no context-switch backend for this architecture");
}

fn build(arch: &str) {
    let src = format!("{}/{}/{}", PATH, arch, ASM_FILE);
    println!("cargo:rerun-if-changed={}", src);
    cc::Build::new().file(&src).compile(LIB_NAME);
}
