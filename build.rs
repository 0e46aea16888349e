use std::env;
use std::process::Command;

fn main() {
    // PyO3's build script selects the interpreter; we additionally put its
    // LIBDIR on the linker search path so the cdylib and the test binaries
    // find libpython when it is not in a system location.
    println!("cargo:rerun-if-env-changed=PYO3_PYTHON");
    let python = env::var("PYO3_PYTHON").unwrap_or_else(|_| "python3".to_string());

    if let Ok(output) = Command::new(&python).arg("--version").output() {
        if output.status.success() {
            let version = String::from_utf8_lossy(&output.stdout);
            println!("cargo:warning=Embedding {}", version.trim());
        }
    }

    let libdir = Command::new(&python)
        .args([
            "-c",
            "import sysconfig; print(sysconfig.get_config_var('LIBDIR'))",
        ])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string());

    if let Some(libdir) = libdir.filter(|dir| !dir.is_empty() && dir != "None") {
        println!("cargo:rustc-link-search=native={libdir}");
        // Test binaries load libpython at run time too.
        let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
        if target_os == "linux" || target_os == "macos" {
            println!("cargo:rustc-link-arg=-Wl,-rpath,{libdir}");
        }
    }
}
