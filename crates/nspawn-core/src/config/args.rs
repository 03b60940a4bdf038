use crate::config::build::{ContainerConfig, ImagePath};

impl ContainerConfig {
    /// Render the supervisor's command line.
    ///
    /// The order is fixed and maps are iterated sorted, so identical
    /// configurations always produce identical vectors.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |parts: &[&str]| args.extend(parts.iter().map(|s| s.to_string()));

        match &self.image_path {
            Some(ImagePath::Directory(p)) => push(&["-D", &p.display().to_string()]),
            Some(ImagePath::File(p)) => push(&["-i", &p.display().to_string()]),
            None => {}
        }

        if let Some(j) = self.link_journal {
            push(&["--link-journal", j.as_str()]);
        }
        if let Some(dir) = &self.directory {
            push(&["--directory", &dir.display().to_string()]);
        }
        if self.boot {
            push(&["--boot"]);
        }
        if self.ephemeral {
            push(&["--ephemeral"]);
        }
        if self.network_veth {
            push(&["--network-veth"]);
        }
        if let Some(ns) = &self.network_namespace {
            push(&["--network-namespace-path", &ns.display().to_string()]);
        }
        if self.process_two {
            push(&["--as-pid2"]);
        }
        if self.read_only {
            push(&["--read-only"]);
        }
        if self.user_namespacing {
            push(&["-U"]);
        }
        if let Some(c) = self.console {
            push(&[&format!("--console={c}")]);
        }
        push(&["--machine", &self.machine]);
        if let Some(p) = &self.pivot_root {
            push(&["--pivot-root", p]);
        }
        if let Some(r) = self.resolv_conf {
            push(&["--resolv-conf", r.as_str()]);
        }
        if let Some(u) = &self.user {
            push(&["--user", u]);
        }
        if let Some(v) = self.volatile {
            push(&[&format!("--volatile={v}")]);
        }
        if let Some(wd) = &self.working_directory {
            push(&["--chdir", wd]);
        }

        for (host, guest) in &self.bind {
            push(&["--bind", &format!("{host}:{guest}")]);
        }
        for (host, guest) in &self.bind_read_only {
            push(&["--bind-ro", &format!("{host}:{guest}")]);
        }
        for (k, v) in &self.environment {
            push(&["-E", &format!("{k}={v}")]);
        }
        for mapping in self.ports.values() {
            push(&["-p", mapping]);
        }
        for (k, v) in &self.properties {
            push(&["--property", &format!("{k}={v}")]);
        }
        if !self.capability.is_empty() {
            push(&["--capability", &self.capability.join(",")]);
        }
        if let Some(zone) = &self.network_zone {
            push(&[&format!("--network-zone={zone}")]);
        }

        args.extend(self.command.iter().cloned());
        args
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use nspawn_model::{MachineConfig, TaskConfig, TaskDir, TaskId};

    use super::*;
    use crate::config::build::BuildOptions;

    fn build(cfg: MachineConfig) -> ContainerConfig {
        let task = TaskConfig {
            id: TaskId::from("t-1"),
            alloc_id: "a1".into(),
            name: "web".into(),
            env: BTreeMap::new(),
            resources: Default::default(),
            mounts: vec![],
            network_isolation: None,
            task_dir: TaskDir::default(),
            stdout_path: "/tmp/out".into(),
            stderr_path: "/tmp/err".into(),
            driver_config: cfg,
        };
        ContainerConfig::build(&task, &BuildOptions::default()).unwrap()
    }

    #[test]
    fn renders_in_fixed_order() {
        let mut c = build(MachineConfig {
            image: Some("debian".into()),
            boot: true,
            capability: vec!["CAP_NET_ADMIN".into(), "CAP_SYS_TIME".into()],
            command: vec!["/bin/sh".into(), "-c".into(), "sleep 1".into()],
            environment: BTreeMap::from([
                ("B".to_string(), "2".to_string()),
                ("A".to_string(), "1".to_string()),
            ]),
            network_zone: Some("web".into()),
            volatile: Some("overlay".into()),
            ..Default::default()
        });
        c.image_path = Some(ImagePath::Directory("/var/lib/machines/debian".into()));

        assert_eq!(
            c.args(),
            vec![
                "-D",
                "/var/lib/machines/debian",
                "--boot",
                "--console=read-only",
                "--machine",
                "web-a1",
                "--resolv-conf",
                "copy-host",
                "--volatile=overlay",
                "-E",
                "A=1",
                "-E",
                "B=2",
                "--capability",
                "CAP_NET_ADMIN,CAP_SYS_TIME",
                "--network-zone=web",
                "/bin/sh",
                "-c",
                "sleep 1",
            ]
        );
    }

    #[test]
    fn image_files_use_dash_i() {
        let mut c = build(MachineConfig {
            image: Some("disk.raw".into()),
            console: None,
            resolv_conf: None,
            ..Default::default()
        });
        c.image_path = Some(ImagePath::File("/srv/disk.raw".into()));
        c.bind_read_only
            .insert("/nix/store/abc-bash".into(), "/nix/store/abc-bash".into());

        assert_eq!(
            c.args(),
            vec![
                "-i",
                "/srv/disk.raw",
                "--machine",
                "web-a1",
                "--bind-ro",
                "/nix/store/abc-bash:/nix/store/abc-bash",
            ]
        );
    }

    #[test]
    fn identical_configs_render_identically() {
        let cfg = MachineConfig {
            image: Some("debian".into()),
            bind: BTreeMap::from([
                ("/z".to_string(), "/z".to_string()),
                ("/a".to_string(), "/a".to_string()),
            ]),
            properties: BTreeMap::from([("CPUWeight".to_string(), "50".to_string())]),
            ..Default::default()
        };
        assert_eq!(build(cfg.clone()).args(), build(cfg).args());
    }
}
