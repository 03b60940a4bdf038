use std::collections::BTreeMap;

use procfs::{ProcError, process::Process};

/// Environment block of a running process, lossily decoded.
pub fn read_environ(pid: u32) -> Result<BTreeMap<String, String>, ProcError> {
    let environ = Process::new(pid as i32)?.environ()?;
    Ok(environ
        .into_iter()
        .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_own_environment() {
        let env = read_environ(std::process::id()).unwrap();
        assert_eq!(env.get("PATH"), std::env::var("PATH").ok().as_ref());
    }

    #[test]
    fn missing_process_is_an_error() {
        assert!(read_environ(i32::MAX as u32).is_err());
    }
}
