use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, info};

use crate::{
    config::ContainerConfig,
    image::{error::ImageError, tool::BuildTool},
};

const PROFILE_LINK: &str = "current-profile";
const CLOSURE_LINK: &str = "current-closure";

/// Outcome of an image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// Root of the built file system (toplevel or merged profile).
    pub root: PathBuf,
    /// Seeds the container's store database.
    pub registration: PathBuf,
    /// Duplicate-free transitive dependencies, including the built artifact.
    pub closure: Vec<PathBuf>,
}

/// Turns nixos / package references into read-only binds of a container.
#[derive(Clone)]
pub struct ImageResolver {
    tool: Arc<dyn BuildTool>,
}

impl ImageResolver {
    pub fn new(tool: Arc<dyn BuildTool>) -> Self {
        Self { tool }
    }

    /// Build whatever `cfg` references and bind it in; `dir` becomes the
    /// container's mutable root. Returns `None` if nothing needs building.
    pub async fn prepare(
        &self,
        cfg: &mut ContainerConfig,
        dir: &Path,
    ) -> Result<Option<ResolvedImage>, ImageError> {
        if let Some(flake) = cfg.nixos.clone() {
            return self.prepare_system(cfg, &flake, dir).await.map(Some);
        }
        if !cfg.packages.is_empty() {
            let packages = cfg.packages.clone();
            return self.prepare_packages(cfg, &packages, dir).await.map(Some);
        }
        Ok(None)
    }

    /// Requisites of `target`, deduplicated in first-seen order, with
    /// `target` itself always present.
    pub async fn closure(&self, target: &Path) -> Result<Vec<PathBuf>, ImageError> {
        let requisites = self
            .tool
            .requisites(target)
            .await
            .map_err(|e| ImageError::Requisites {
                path: target.display().to_string(),
                source: Box::new(e),
            })?;

        let mut seen = HashSet::new();
        let mut closure: Vec<PathBuf> = requisites
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();
        if !seen.contains(target) {
            closure.push(target.to_path_buf());
        }
        Ok(closure)
    }

    async fn prepare_system(
        &self,
        cfg: &mut ContainerConfig,
        flake: &str,
        dir: &Path,
    ) -> Result<ResolvedImage, ImageError> {
        let prefix = format!("{flake}.config.system.build");
        info!(machine = %cfg.machine, flake, "building system image");

        let closure_target = format!("{prefix}.closure");
        let closure = self
            .tool
            .build(&closure_target)
            .await
            .map_err(ImageError::build(closure_target))?;

        let toplevel_target = format!("{prefix}.toplevel");
        let toplevel = self
            .tool
            .build(&toplevel_target)
            .await
            .map_err(ImageError::build(toplevel_target))?;

        let registration = closure.join("registration");
        let ro = &mut cfg.bind_read_only;
        ro.insert(display(&toplevel), display(&toplevel));
        ro.insert(display(&registration), "/registration".into());
        ro.insert(display(&toplevel.join("init")), "/init".into());
        ro.insert(display(&toplevel.join("sw")), "/sw".into());

        let requisites = self.closure(&closure).await?;
        bind_store_paths(cfg, &requisites);
        finish(cfg, dir, "/init").await?;

        Ok(ResolvedImage {
            root: toplevel,
            registration,
            closure: requisites,
        })
    }

    async fn prepare_packages(
        &self,
        cfg: &mut ContainerConfig,
        packages: &[String],
        dir: &Path,
    ) -> Result<ResolvedImage, ImageError> {
        info!(machine = %cfg.machine, ?packages, "building package profile");
        let target = packages.join(" ");

        let profile = self
            .tool
            .profile_install(packages, &dir.join(PROFILE_LINK))
            .await
            .map_err(ImageError::build(target.clone()))?;
        let closure = self
            .tool
            .build_closure(packages, &dir.join(CLOSURE_LINK))
            .await
            .map_err(ImageError::build(target))?;

        cfg.bind_read_only.insert(display(&profile), display(&profile));
        for name in list_dir(&profile).await? {
            if name != "etc" {
                cfg.bind_read_only
                    .insert(display(&profile.join(&name)), format!("/{name}"));
                continue;
            }
            for etc in list_dir(&profile.join("etc")).await? {
                // resolv.conf is owned by the resolv_conf option
                if etc == "resolv.conf" {
                    continue;
                }
                cfg.bind_read_only
                    .insert(display(&profile.join("etc").join(&etc)), format!("/etc/{etc}"));
            }
        }

        let registration = closure.join("registration");
        cfg.bind_read_only
            .insert(display(&registration), "/registration".into());

        let requisites = self.closure(&closure).await?;
        bind_store_paths(cfg, &requisites);
        finish(cfg, dir, "/bin/sh").await?;

        Ok(ResolvedImage {
            root: profile,
            registration,
            closure: requisites,
        })
    }
}

fn display(p: &Path) -> String {
    p.display().to_string()
}

fn bind_store_paths(cfg: &mut ContainerConfig, paths: &[PathBuf]) {
    debug!(machine = %cfg.machine, count = paths.len(), "binding closure");
    for p in paths {
        cfg.bind_read_only.insert(display(p), display(p));
    }
}

async fn list_dir(dir: &Path) -> Result<Vec<String>, ImageError> {
    let context = || format!("couldn't read directory {}", dir.display());
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(ImageError::io(context()))?;

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(ImageError::io(context()))? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

async fn finish(cfg: &mut ContainerConfig, dir: &Path, entrypoint: &str) -> Result<(), ImageError> {
    cfg.directory = Some(dir.to_path_buf());
    create_usr(cfg, dir).await?;
    if cfg.command.is_empty() {
        cfg.command = vec![entrypoint.to_string()];
    }
    cfg.environment
        .entry("PATH".to_string())
        .or_insert_with(|| "/bin".to_string());
    Ok(())
}

/// Create `<dir>/usr` unless a read-only bind already provides `/usr`.
pub(crate) async fn create_usr(cfg: &ContainerConfig, dir: &Path) -> Result<(), ImageError> {
    let provided = cfg
        .bind_read_only
        .values()
        .any(|guest| guest == "/usr" || guest.starts_with("/usr/"));
    if provided {
        return Ok(());
    }

    let usr = dir.join("usr");
    tokio::fs::create_dir_all(&usr)
        .await
        .map_err(ImageError::io(format!("create {}", usr.display())))
}
