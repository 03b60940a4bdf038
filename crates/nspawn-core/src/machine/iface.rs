use std::ffi::CStr;

use crate::machine::error::MachineError;

/// Resolve host interface indices to names.
pub fn interface_names(indices: &[i32]) -> Result<Vec<String>, MachineError> {
    if indices.is_empty() {
        return Err(MachineError::NoInterfaces);
    }
    indices.iter().map(|&i| interface_name(i)).collect()
}

fn interface_name(index: i32) -> Result<String, MachineError> {
    let index_u32 = u32::try_from(index).map_err(|_| MachineError::Interface(index))?;
    let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];

    // SAFETY: buf holds IF_NAMESIZE bytes as if_indextoname requires.
    let ptr = unsafe { libc::if_indextoname(index_u32, buf.as_mut_ptr()) };
    if ptr.is_null() {
        return Err(MachineError::Interface(index));
    }

    // SAFETY: on success the buffer holds a NUL-terminated name.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}
