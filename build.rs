use std::process::Command;

/// Build-time override, for images built without a .git directory.
const HASH_OVERRIDE_VAR: &str = "EXPORT_SCHEDULER_BUILD_HASH";

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim().to_string())
}

fn build_hash() -> String {
    if let Ok(hash) = std::env::var(HASH_OVERRIDE_VAR) {
        if !hash.trim().is_empty() {
            return hash.trim().to_string();
        }
    }

    match git(&["rev-parse", "--short", "HEAD"]) {
        Some(hash) => {
            let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
                .map(|s| !s.is_empty())
                .unwrap_or(false);
            if dirty {
                format!("{}-dirty", hash)
            } else {
                hash
            }
        }
        None => "unknown".to_string(),
    }
}

fn main() {
    println!("cargo:rustc-env=GIT_HASH={}", build_hash());

    println!("cargo:rerun-if-env-changed={}", HASH_OVERRIDE_VAR);
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");
}
