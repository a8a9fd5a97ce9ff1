// Embed git hash for --version. Optional; no git = no hash.
fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    let package_version = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let mut version = package_version.clone();

    if let Ok(output) = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
    {
        if output.status.success() {
            if let Ok(s) = String::from_utf8(output.stdout) {
                let hash = s.trim();
                if !hash.is_empty() {
                    println!("cargo:rustc-env=BLOCKPIX_GIT_HASH={hash}");
                    version = format!("{package_version} ({hash})");
                }
            }
        }
    }
    println!("cargo:rustc-env=BLOCKPIX_VERSION={version}");
}
