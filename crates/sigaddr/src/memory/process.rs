//! Foreign process access on Windows
//!
//! Opens a process for reading, locates its main module and enumerates the
//! committed, accessible regions of that module for scanning.

use std::ffi::c_void;
use std::mem;

use tracing::debug;
use windows::Win32::Foundation::{CloseHandle, HANDLE, HMODULE};
use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
    TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE, PAGE_EXECUTE_READ,
    PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY, PAGE_GUARD, PAGE_NOACCESS, VirtualQueryEx,
};
use windows::Win32::System::ProcessStatus::{
    K32EnumProcessModules, K32GetModuleInformation, MODULEINFO,
};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
};

use crate::error::{Error, Result};

use super::{ModuleRegion, ReadMemory, RegionFlags};

/// An open handle to a foreign process and its main module.
#[derive(Debug)]
pub struct ProcessHandle {
    handle: HANDLE,
    pub pid: u32,
    pub base_address: u64,
    pub module_size: usize,
}

// SAFETY: process handles are kernel object references usable from any thread;
// the handle is only passed to thread-safe Win32 calls.
unsafe impl Send for ProcessHandle {}
// SAFETY: see above, no interior state is mutated through `&self`.
unsafe impl Sync for ProcessHandle {}

impl ProcessHandle {
    /// Open a process by PID and locate its main module.
    pub fn open(pid: u32) -> Result<Self> {
        // SAFETY: OpenProcess has no preconditions; failure is reported via Result.
        let handle = unsafe { OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, false, pid) }
            .map_err(|e| Error::ProcessOpenFailed(format!("pid {}: {}", pid, e)))?;

        let mut process = Self {
            handle,
            pid,
            base_address: 0,
            module_size: 0,
        };
        let (base, size) = process.main_module()?;
        process.base_address = base;
        process.module_size = size;
        debug!(
            "Opened process {} (base: {:#x}, size: {:#x})",
            pid, base, size
        );
        Ok(process)
    }

    /// Find a process by executable name (case-insensitive) and open it.
    pub fn find_and_open(exe_name: &str) -> Result<Self> {
        let pid = find_pid(exe_name)?;
        Self::open(pid)
    }

    fn main_module(&self) -> Result<(u64, usize)> {
        let mut modules = [HMODULE::default(); 1];
        let mut needed = 0u32;
        // SAFETY: the buffer is valid for `size_of_val(&modules)` bytes.
        unsafe {
            K32EnumProcessModules(
                self.handle,
                modules.as_mut_ptr(),
                mem::size_of_val(&modules) as u32,
                &mut needed,
            )
        }
        .ok()
        .map_err(|e| Error::ProcessOpenFailed(format!("failed to enumerate modules: {}", e)))?;

        let mut info = MODULEINFO::default();
        // SAFETY: `info` is a properly sized MODULEINFO.
        unsafe {
            K32GetModuleInformation(
                self.handle,
                modules[0],
                &mut info,
                mem::size_of::<MODULEINFO>() as u32,
            )
        }
        .ok()
        .map_err(|e| Error::ProcessOpenFailed(format!("failed to query main module: {}", e)))?;

        Ok((info.lpBaseOfDll as u64, info.SizeOfImage as usize))
    }

    /// Committed, accessible regions of the main module.
    pub fn module_regions(&self) -> Vec<ModuleRegion> {
        let mut regions = Vec::new();
        let end = self.base_address + self.module_size as u64;
        let mut address = self.base_address;

        while address < end {
            let mut info = MEMORY_BASIC_INFORMATION::default();
            // SAFETY: `info` is a properly sized MEMORY_BASIC_INFORMATION.
            let written = unsafe {
                VirtualQueryEx(
                    self.handle,
                    Some(address as *const c_void),
                    &mut info,
                    mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            if written == 0 || info.RegionSize == 0 {
                break;
            }

            let region_base = info.BaseAddress as u64;
            let region_end = (region_base + info.RegionSize as u64).min(end);
            let protect = info.Protect.0;
            let accessible = protect & (PAGE_GUARD.0 | PAGE_NOACCESS.0) == 0;

            if info.State == MEM_COMMIT && accessible {
                let executable = protect
                    & (PAGE_EXECUTE.0
                        | PAGE_EXECUTE_READ.0
                        | PAGE_EXECUTE_READWRITE.0
                        | PAGE_EXECUTE_WRITECOPY.0)
                    != 0;
                let start = region_base.max(self.base_address);
                regions.push(ModuleRegion::new(
                    start,
                    (region_end - start) as usize,
                    RegionFlags {
                        readable: true,
                        executable,
                    },
                ));
            }

            address = region_end;
        }

        debug!("Enumerated {} module regions", regions.len());
        regions
    }
}

impl ReadMemory for ProcessHandle {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        let mut read = 0usize;
        // SAFETY: `buffer` is valid for `size` bytes of writes.
        unsafe {
            ReadProcessMemory(
                self.handle,
                address as *const c_void,
                buffer.as_mut_ptr() as *mut c_void,
                size,
                Some(&mut read),
            )
        }
        .map_err(|e| Error::MemoryReadFailed {
            address,
            message: e.to_string(),
        })?;

        if read != size {
            return Err(Error::MemoryReadFailed {
                address,
                message: format!("short read: {} of {} bytes", read, size),
            });
        }
        Ok(buffer)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // SAFETY: the handle was returned by OpenProcess and is closed exactly once.
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

fn find_pid(exe_name: &str) -> Result<u32> {
    // SAFETY: CreateToolhelp32Snapshot has no preconditions.
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
        .map_err(|e| Error::ProcessNotFound(format!("failed to snapshot processes: {}", e)))?;

    let mut entry = PROCESSENTRY32W {
        dwSize: mem::size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
    };

    let mut found = None;
    // SAFETY: `entry.dwSize` is initialized as required by Process32FirstW.
    let mut next = unsafe { Process32FirstW(snapshot, &mut entry) };
    while next.is_ok() {
        let name = String::from_utf16_lossy(&entry.szExeFile);
        if name.trim_end_matches('\0').eq_ignore_ascii_case(exe_name) {
            found = Some(entry.th32ProcessID);
            break;
        }
        // SAFETY: same snapshot and entry as above.
        next = unsafe { Process32NextW(snapshot, &mut entry) };
    }

    // SAFETY: the snapshot handle is closed exactly once.
    unsafe {
        let _ = CloseHandle(snapshot);
    }

    found.ok_or_else(|| Error::ProcessNotFound(exe_name.to_string()))
}
