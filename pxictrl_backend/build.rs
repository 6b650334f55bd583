use std::env;

const WINDOWS_LIB_DIR: &str = r"C:\Program Files (x86)\National Instruments\Shared\ExternalCompilerSupport\C\lib64\msvc";
const LINUX_LIB_DIR: &str = "/usr/lib/x86_64-linux-gnu";

fn main() {
    println!("cargo:rerun-if-env-changed=NIDAQMX_LIB_DIR");
    if env::var_os("CARGO_FEATURE_NIDAQMX").is_none() {
        return;
    }
    let lib_dir = env::var("NIDAQMX_LIB_DIR").unwrap_or_else(|_| {
        match env::var("CARGO_CFG_TARGET_OS").as_deref() {
            Ok("windows") => WINDOWS_LIB_DIR,
            _ => LINUX_LIB_DIR,
        }
        .to_string()
    });
    println!("cargo:rustc-link-search=native={}", lib_dir);
}
