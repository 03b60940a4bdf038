use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::image::{error::ImageError, tool::BuildTool};

const CLOSURE_NIX: &str = include_str!("closure.nix");

/// [`BuildTool`] backed by the `nix` command line.
#[derive(Debug, Clone)]
pub struct NixCli {
    program: String,
}

#[derive(Debug, Deserialize)]
struct BuildResult {
    #[serde(default)]
    outputs: HashMap<String, String>,
}

impl NixCli {
    pub fn new() -> Self {
        Self::with_program("nix")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run nix and return its stdout. Stderr is captured for the error.
    async fn run(&self, args: &[String]) -> Result<Vec<u8>, ImageError> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!(target: "nspawn.image.nix", %command, "running build tool");

        let out = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ImageError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !out.status.success() {
            return Err(ImageError::Command {
                command,
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(out.stdout)
    }
}

impl Default for NixCli {
    fn default() -> Self {
        Self::new()
    }
}

fn args<const N: usize>(fixed: [&str; N]) -> Vec<String> {
    fixed.iter().map(|s| s.to_string()).collect()
}

/// Rewrite `path:.<rest>` references to absolute ones below `cwd`.
pub(crate) fn absolutize_flake(flake: &str, cwd: &Path) -> String {
    match flake.strip_prefix("path:.") {
        Some(rest) => format!("path:{}{rest}", cwd.display()),
        None => flake.to_string(),
    }
}

/// Extract store paths from `nix path-info --json`.
///
/// Older nix prints an array of records, newer an object keyed by path.
pub(crate) fn parse_path_info(raw: &[u8]) -> Result<Vec<PathBuf>, String> {
    let value: serde_json::Value = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
    match value {
        serde_json::Value::Array(records) => records
            .iter()
            .map(|r| {
                r.get("path")
                    .and_then(|p| p.as_str())
                    .map(PathBuf::from)
                    .ok_or_else(|| "record without path".to_string())
            })
            .collect(),
        serde_json::Value::Object(map) => Ok(map.keys().map(PathBuf::from).collect()),
        other => Err(format!("expected array or object, got {other}")),
    }
}

/// Follow `link` twice: profile link -> generation link -> store path.
async fn resolve_profile(link: &Path) -> Result<PathBuf, ImageError> {
    let mut current = link.to_path_buf();
    for _ in 0..2 {
        let target = tokio::fs::read_link(&current)
            .await
            .map_err(ImageError::io(format!("readlink {}", current.display())))?;
        current = match (target.is_relative(), current.parent()) {
            (true, Some(parent)) => parent.join(target),
            _ => target,
        };
    }
    Ok(current)
}

#[async_trait]
impl BuildTool for NixCli {
    #[instrument(skip(self), level = "debug")]
    async fn build(&self, installable: &str) -> Result<PathBuf, ImageError> {
        let mut argv = args(["build", "--no-link", "--no-write-lock-file", "--json"]);
        argv.push(installable.to_string());
        let stdout = self.run(&argv).await?;

        let output = |reason: String| ImageError::Output {
            command: format!("{} build {installable}", self.program),
            reason,
        };
        let results: Vec<BuildResult> =
            serde_json::from_slice(&stdout).map_err(|e| output(e.to_string()))?;
        results
            .into_iter()
            .next()
            .and_then(|mut r| r.outputs.remove("out"))
            .map(PathBuf::from)
            .ok_or_else(|| output("no `out` output".to_string()))
    }

    #[instrument(skip(self), level = "debug")]
    async fn profile_install(&self, flakes: &[String], link: &Path) -> Result<PathBuf, ImageError> {
        let mut argv = args(["profile", "install", "--no-write-lock-file", "--profile"]);
        argv.push(link.display().to_string());
        argv.extend(flakes.iter().cloned());
        self.run(&argv).await?;

        resolve_profile(link).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn build_closure(&self, flakes: &[String], link: &Path) -> Result<PathBuf, ImageError> {
        let cwd = std::env::current_dir().map_err(ImageError::io("current directory"))?;
        let flakes: Vec<String> = flakes.iter().map(|f| absolutize_flake(f, &cwd)).collect();
        let json = serde_json::to_string(&flakes).map_err(|e| ImageError::Output {
            command: "encode flakes".to_string(),
            reason: e.to_string(),
        })?;

        let mut argv = args(["build", "--out-link"]);
        argv.push(link.display().to_string());
        argv.extend(args(["--expr", CLOSURE_NIX, "--impure", "--no-write-lock-file"]));
        argv.extend(args(["--argstr", "flakes"]));
        argv.push(json);
        self.run(&argv).await?;

        tokio::fs::read_link(link)
            .await
            .map_err(ImageError::io(format!("readlink {}", link.display())))
    }

    #[instrument(skip(self), level = "debug")]
    async fn requisites(&self, path: &Path) -> Result<Vec<PathBuf>, ImageError> {
        let mut argv = args(["path-info", "--json", "--recursive"]);
        argv.push(path.display().to_string());
        let stdout = self.run(&argv).await?;

        parse_path_info(&stdout).map_err(|reason| ImageError::Output {
            command: format!("{} path-info {}", self.program, path.display()),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_flakes_become_absolute() {
        let cwd = Path::new("/srv/jobs");
        assert_eq!(absolutize_flake("path:./pkgs#hello", cwd), "path:/srv/jobs/pkgs#hello");
        assert_eq!(absolutize_flake("path:.#hello", cwd), "path:/srv/jobs#hello");
        assert_eq!(absolutize_flake("nixpkgs#bash", cwd), "nixpkgs#bash");
    }

    #[test]
    fn path_info_array_and_object() {
        let array = br#"[{"path":"/nix/store/aaa-bash","references":[]},{"path":"/nix/store/bbb-glibc"}]"#;
        assert_eq!(
            parse_path_info(array).unwrap(),
            vec![
                PathBuf::from("/nix/store/aaa-bash"),
                PathBuf::from("/nix/store/bbb-glibc")
            ]
        );

        let object = br#"{"/nix/store/aaa-bash":{"narSize":1},"/nix/store/bbb-glibc":{}}"#;
        assert_eq!(parse_path_info(object).unwrap().len(), 2);

        assert!(parse_path_info(b"42").is_err());
        assert!(parse_path_info(br#"[{"narSize":1}]"#).is_err());
    }

    #[tokio::test]
    async fn failing_tool_reports_stderr() {
        let nix = NixCli::with_program("sh");
        let err = nix
            .run(&["-c".to_string(), "echo boom >&2; exit 1".to_string()])
            .await
            .unwrap_err();
        match err {
            ImageError::Command { command, stderr } => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn profile_link_is_followed_to_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("store-profile");
        std::fs::create_dir(&store).unwrap();
        std::os::unix::fs::symlink(&store, dir.path().join("current-profile-1-link")).unwrap();
        std::os::unix::fs::symlink("current-profile-1-link", dir.path().join("current-profile"))
            .unwrap();

        let resolved = resolve_profile(&dir.path().join("current-profile")).await.unwrap();
        assert_eq!(resolved, store);
    }
}
