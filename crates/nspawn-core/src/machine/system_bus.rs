use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use dbus::{
    arg::{PropMap, prop_cast},
    blocking::{Connection, stdintf::org_freedesktop_dbus::Properties},
};
use tracing::debug;

use crate::{
    config::ImageKind,
    machine::{
        bus::{ImageProps, MachineAddress, MachineBus, MachineProps, PullRequest, Transfer},
        error::MachineError,
    },
};

const MACHINE1: &str = "org.freedesktop.machine1";
const MACHINE1_PATH: &str = "/org/freedesktop/machine1";
const MACHINE1_MANAGER: &str = "org.freedesktop.machine1.Manager";
const MACHINE1_MACHINE: &str = "org.freedesktop.machine1.Machine";
const MACHINE1_IMAGE: &str = "org.freedesktop.machine1.Image";

const IMPORT1: &str = "org.freedesktop.import1";
const IMPORT1_PATH: &str = "/org/freedesktop/import1";
const IMPORT1_MANAGER: &str = "org.freedesktop.import1.Manager";

const SYSTEMD1: &str = "org.freedesktop.systemd1";
const SYSTEMD1_PATH: &str = "/org/freedesktop/systemd1";
const SYSTEMD1_MANAGER: &str = "org.freedesktop.systemd1.Manager";

/// [`MachineBus`] over the system D-Bus.
///
/// The connection is opened on first use and shared by all calls. Calls are
/// blocking and run on the blocking thread pool.
#[derive(Clone)]
pub struct SystemBus {
    conn: Arc<Mutex<Option<Connection>>>,
    timeout: Duration,
}

impl SystemBus {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            conn: Arc::new(Mutex::new(None)),
            timeout,
        }
    }

    async fn call<R, F>(&self, f: F) -> Result<R, MachineError>
    where
        R: Send + 'static,
        F: FnOnce(&Connection, Duration) -> Result<R, MachineError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let conn = match &mut *guard {
                Some(c) => c,
                slot @ None => {
                    debug!(target: "nspawn.bus", "connecting to the system bus");
                    let c = Connection::new_system()
                        .map_err(|e| MachineError::Connect(e.to_string()))?;
                    slot.insert(c)
                }
            };
            let res = f(conn, timeout);
            if matches!(res, Err(MachineError::Call { .. })) && !conn.channel().is_connected() {
                *guard = None;
            }
            res
        })
        .await
        .map_err(|e| MachineError::Worker(e.to_string()))?
    }
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

fn call_err(method: &'static str) -> impl FnOnce(dbus::Error) -> MachineError {
    move |e| MachineError::Call {
        method,
        message: e.message().unwrap_or("unknown error").to_string(),
    }
}

fn string_prop(props: &PropMap, key: &'static str) -> Result<String, MachineError> {
    prop_cast::<String>(props, key)
        .cloned()
        .ok_or(MachineError::Property(key))
}

#[async_trait]
impl MachineBus for SystemBus {
    async fn describe_machine(&self, name: &str) -> Result<MachineProps, MachineError> {
        let name = name.to_string();
        self.call(move |conn, timeout| {
            let manager = conn.with_proxy(MACHINE1, MACHINE1_PATH, timeout);
            let (path,): (dbus::Path<'static>,) = manager
                .method_call(MACHINE1_MANAGER, "GetMachine", (name.as_str(),))
                .map_err(call_err("GetMachine"))?;

            let props = conn
                .with_proxy(MACHINE1, path, timeout)
                .get_all(MACHINE1_MACHINE)
                .map_err(call_err("GetAll"))?;

            Ok(MachineProps {
                name: string_prop(&props, "Name")?,
                leader: prop_cast::<u32>(&props, "Leader")
                    .copied()
                    .ok_or(MachineError::Property("Leader"))?,
                network_interfaces: prop_cast::<Vec<i32>>(&props, "NetworkInterfaces")
                    .cloned()
                    .unwrap_or_default(),
                class: string_prop(&props, "Class").unwrap_or_default(),
                service: string_prop(&props, "Service").unwrap_or_default(),
                state: string_prop(&props, "State").unwrap_or_default(),
                unit: string_prop(&props, "Unit").unwrap_or_default(),
                root_directory: string_prop(&props, "RootDirectory").unwrap_or_default(),
            })
        })
        .await
    }

    async fn machine_addresses(&self, name: &str) -> Result<Vec<MachineAddress>, MachineError> {
        let name = name.to_string();
        self.call(move |conn, timeout| {
            let manager = conn.with_proxy(MACHINE1, MACHINE1_PATH, timeout);
            let (addrs,): (Vec<(i32, Vec<u8>)>,) = manager
                .method_call(MACHINE1_MANAGER, "GetMachineAddresses", (name.as_str(),))
                .map_err(call_err("GetMachineAddresses"))?;

            Ok(addrs
                .into_iter()
                .map(|(family, address)| MachineAddress { family, address })
                .collect())
        })
        .await
    }

    async fn describe_image(&self, name: &str) -> Result<ImageProps, MachineError> {
        let name = name.to_string();
        self.call(move |conn, timeout| {
            let manager = conn.with_proxy(MACHINE1, MACHINE1_PATH, timeout);
            let (path,): (dbus::Path<'static>,) = manager
                .method_call(MACHINE1_MANAGER, "GetImage", (name.as_str(),))
                .map_err(call_err("GetImage"))?;

            let props = conn
                .with_proxy(MACHINE1, path, timeout)
                .get_all(MACHINE1_IMAGE)
                .map_err(call_err("GetAll"))?;

            Ok(ImageProps {
                name: string_prop(&props, "Name")?,
                path: PathBuf::from(string_prop(&props, "Path")?),
                image_type: string_prop(&props, "Type").unwrap_or_default(),
                read_only: prop_cast::<bool>(&props, "ReadOnly")
                    .copied()
                    .unwrap_or_default(),
            })
        })
        .await
    }

    async fn pull_image(&self, req: &PullRequest) -> Result<u32, MachineError> {
        let req = req.clone();
        self.call(move |conn, timeout| {
            let method = match req.kind {
                ImageKind::Tar => "PullTar",
                ImageKind::Raw => "PullRaw",
            };
            let manager = conn.with_proxy(IMPORT1, IMPORT1_PATH, timeout);
            let (id, _path): (u32, dbus::Path<'static>) = manager
                .method_call(
                    IMPORT1_MANAGER,
                    method,
                    (
                        req.url.as_str(),
                        req.local.as_str(),
                        req.verify.as_str(),
                        req.force,
                    ),
                )
                .map_err(call_err(method))?;
            Ok(id)
        })
        .await
    }

    async fn list_transfers(&self) -> Result<Vec<Transfer>, MachineError> {
        self.call(|conn, timeout| {
            let manager = conn.with_proxy(IMPORT1, IMPORT1_PATH, timeout);
            type Row = (u32, String, String, String, f64, dbus::Path<'static>);
            let (rows,): (Vec<Row>,) = manager
                .method_call(IMPORT1_MANAGER, "ListTransfers", ())
                .map_err(call_err("ListTransfers"))?;

            Ok(rows
                .into_iter()
                .map(|(id, _kind, _remote, local, progress, _path)| Transfer {
                    id,
                    local,
                    progress,
                })
                .collect())
        })
        .await
    }

    async fn systemd_version(&self) -> Result<String, MachineError> {
        self.call(|conn, timeout| {
            conn.with_proxy(SYSTEMD1, SYSTEMD1_PATH, timeout)
                .get::<String>(SYSTEMD1_MANAGER, "Version")
                .map_err(call_err("Get(Version)"))
        })
        .await
    }
}
