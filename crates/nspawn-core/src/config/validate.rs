use std::path::Path;

use nspawn_model::MachineConfig;

use crate::config::{
    error::ConfigError,
    options::{Console, ImageKind, LinkJournal, ResolvConf, Verify, Volatile, parse_opt},
};

/// Check a container configuration block without touching the host.
///
/// Returns the first violation found. Mutually exclusive pairs are rejected
/// whichever side was set.
pub fn validate(cfg: &MachineConfig) -> Result<(), ConfigError> {
    parse_opt::<LinkJournal>(cfg.link_journal.as_deref())?;
    let volatile = parse_opt::<Volatile>(cfg.volatile.as_deref())?;
    parse_opt::<Console>(cfg.console.as_deref())?;
    parse_opt::<ResolvConf>(cfg.resolv_conf.as_deref())?;

    if let Some(dl) = &cfg.image_download {
        dl.image_type.parse::<ImageKind>()?;
        dl.verify.parse::<Verify>()?;
    }

    exclusive(cfg.boot, cfg.process_two, ("boot", "process_two"))?;
    exclusive(volatile.is_some(), cfg.user_namespacing, ("volatile", "user_namespacing"))?;
    exclusive(cfg.read_only, cfg.user_namespacing, ("read_only", "user_namespacing"))?;
    exclusive(cfg.is_system_image(), cfg.is_package_list(), ("nixos", "packages"))?;

    let image = cfg.image.as_deref().filter(|s| !s.is_empty());
    exclusive(image.is_some(), cfg.is_system_image(), ("image", "nixos"))?;
    exclusive(image.is_some(), cfg.is_package_list(), ("image", "packages"))?;

    if let Some(dir) = cfg.working_directory.as_deref().filter(|s| !s.is_empty())
        && !Path::new(dir).is_absolute()
    {
        return Err(ConfigError::NotAbsolute("working_directory"));
    }

    if let Some(pivot) = cfg.pivot_root.as_deref().filter(|s| !s.is_empty())
        && !pivot.split(':').all(|p| Path::new(p).is_absolute())
    {
        return Err(ConfigError::NotAbsolute("pivot_root"));
    }

    if image == Some("/") && !(cfg.ephemeral || volatile.is_some_and(|v| v.protects_root())) {
        return Err(ConfigError::HostRoot);
    }

    Ok(())
}

fn exclusive(a: bool, b: bool, names: (&'static str, &'static str)) -> Result<(), ConfigError> {
    if a && b {
        return Err(ConfigError::Conflict(names.0, names.1));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspawn_model::ImageDownload;

    fn base() -> MachineConfig {
        MachineConfig {
            image: Some("debian".into()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate(&MachineConfig::default()), Ok(()));
        assert_eq!(validate(&base()), Ok(()));
    }

    #[test]
    fn boot_and_process_two_are_rejected() {
        let cfg = MachineConfig {
            boot: true,
            process_two: true,
            ..base()
        };
        assert_eq!(
            validate(&cfg),
            Err(ConfigError::Conflict("boot", "process_two"))
        );
    }

    #[test]
    fn exclusions_do_not_depend_on_which_side_is_set_first() {
        let mut a = base();
        a.user_namespacing = true;
        a.read_only = true;

        let mut b = base();
        b.read_only = true;
        b.user_namespacing = true;

        assert_eq!(validate(&a), validate(&b));
        assert!(validate(&a).is_err());

        let mut c = base();
        c.volatile = Some("overlay".into());
        c.user_namespacing = true;
        assert_eq!(
            validate(&c),
            Err(ConfigError::Conflict("volatile", "user_namespacing"))
        );
    }

    #[test]
    fn image_sources_are_exclusive() {
        let cfg = MachineConfig {
            nixos: Some("github:org/repo#nixosConfigurations.box".into()),
            packages: vec!["nixpkgs#bash".into()],
            ..Default::default()
        };
        assert_eq!(validate(&cfg), Err(ConfigError::Conflict("nixos", "packages")));

        let cfg = MachineConfig {
            packages: vec!["nixpkgs#bash".into()],
            ..base()
        };
        assert_eq!(validate(&cfg), Err(ConfigError::Conflict("image", "packages")));
    }

    #[test]
    fn enumerated_fields_name_the_offender() {
        let cfg = MachineConfig {
            resolv_conf: Some("copy-everything".into()),
            ..base()
        };
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::InvalidValue { field: "resolv_conf", .. })
        ));

        let cfg = MachineConfig {
            image_download: Some(ImageDownload {
                url: "https://example.org/debian.tar".into(),
                image_type: "tar".into(),
                force: false,
                verify: "maybe".into(),
            }),
            ..base()
        };
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::InvalidValue { field: "image_download.verify", .. })
        ));
    }

    #[test]
    fn paths_must_be_absolute() {
        let cfg = MachineConfig {
            working_directory: Some("srv".into()),
            ..base()
        };
        assert_eq!(validate(&cfg), Err(ConfigError::NotAbsolute("working_directory")));

        let cfg = MachineConfig {
            pivot_root: Some("/sysroot:oldroot".into()),
            ..base()
        };
        assert_eq!(validate(&cfg), Err(ConfigError::NotAbsolute("pivot_root")));

        let cfg = MachineConfig {
            pivot_root: Some("/sysroot:/oldroot".into()),
            ..base()
        };
        assert_eq!(validate(&cfg), Ok(()));
    }

    #[test]
    fn host_root_needs_a_throwaway_mode() {
        let mut cfg = MachineConfig {
            image: Some("/".into()),
            ..Default::default()
        };
        assert_eq!(validate(&cfg), Err(ConfigError::HostRoot));

        cfg.volatile = Some("overlay".into());
        assert_eq!(validate(&cfg), Err(ConfigError::HostRoot));

        cfg.volatile = Some("state".into());
        assert_eq!(validate(&cfg), Ok(()));

        cfg.volatile = None;
        cfg.ephemeral = true;
        assert_eq!(validate(&cfg), Ok(()));
    }
}
