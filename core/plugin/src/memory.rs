use wasmtime::{Memory, Store};

use crate::error::PluginError;
use crate::host::HostState;

pub fn write_bytes(
    store: &mut Store<HostState>,
    memory: &Memory,
    ptr: u32,
    bytes: &[u8],
) -> Result<(), PluginError> {
    memory
        .write(&mut *store, ptr as usize, bytes)
        .map_err(|_| PluginError::MemoryAccessOutOfBounds)
}

pub fn read_bytes(
    store: &Store<HostState>,
    memory: &Memory,
    ptr: u32,
    len: u32,
) -> Result<Vec<u8>, PluginError> {
    let mut out = vec![0u8; len as usize];
    memory
        .read(store, ptr as usize, &mut out)
        .map_err(|_| PluginError::MemoryAccessOutOfBounds)?;
    Ok(out)
}

pub fn read_u32_le(store: &Store<HostState>, memory: &Memory, ptr: u32) -> Result<u32, PluginError> {
    let bytes = read_bytes(store, memory, ptr, 4)?;
    Ok(u32::from_le_bytes(bytes.try_into().expect("length checked as 4")))
}
