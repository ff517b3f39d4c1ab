//! Rilevamento dei diritti di amministratore.
//!
//! Qualsiasi errore nel determinarli vale come "non elevato".

/// Check if the current process runs with administrator rights
#[cfg(windows)]
pub fn is_elevated() -> bool {
    use windows_sys::Win32::Security::{
        CheckTokenMembership, CreateWellKnownSid, WinBuiltinAdministratorsSid, SECURITY_MAX_SID_SIZE,
    };

    // SAFETY: the SID buffer is sized for any well-known SID and outlives both calls.
    unsafe {
        let mut sid = [0u8; SECURITY_MAX_SID_SIZE as usize];
        let mut sid_size: u32 = SECURITY_MAX_SID_SIZE;
        let sid_ptr = sid.as_mut_ptr() as *mut core::ffi::c_void;
        if CreateWellKnownSid(WinBuiltinAdministratorsSid, std::ptr::null_mut(), sid_ptr, &mut sid_size) == 0 {
            return false;
        }
        let mut is_member: i32 = 0;
        if CheckTokenMembership(std::ptr::null_mut(), sid_ptr, &mut is_member) == 0 {
            return false;
        }
        is_member != 0
    }
}

/// Check if the current process runs as root
#[cfg(unix)]
pub fn is_elevated() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(any(windows, unix)))]
pub fn is_elevated() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_check_is_stable() {
        assert_eq!(is_elevated(), is_elevated());
    }
}
