//! Client behavior against a scripted NWA server on a real socket: command
//! framing, grouped reads/writes, core discovery and domain translation.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use snimux_devices::{
    AddressTuple, Deadline, Device, DeviceError, DomainOffsetData, DomainReadRequest,
    DomainWriteRequest, Field, MemoryReadRequest, MemoryWriteRequest,
};
use snimux_nwa::NwaClient;
use snimux_platforms::Config;

/// A scripted server: reads one command line (plus binary block when the
/// line is `b`-prefixed) and answers from the script, recording everything
/// it saw.
struct Server {
    listener: TcpListener,
}

enum Answer {
    Ascii(&'static str),
    Binary(Vec<u8>),
}

impl Server {
    fn start(script: Vec<Answer>) -> (Server, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let accept = listener.try_clone().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = accept.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut seen = Vec::new();

            for answer in script {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let line = line.trim_end_matches('\n').to_owned();
                let binary = line.starts_with('b');
                let mut seen_line = line.clone();
                if binary {
                    let mut head = [0u8; 5];
                    reader.read_exact(&mut head).unwrap();
                    assert_eq!(head[0], 0);
                    let len = u32::from_be_bytes([head[1], head[2], head[3], head[4]]) as usize;
                    let mut payload = vec![0u8; len];
                    reader.read_exact(&mut payload).unwrap();
                    seen_line.push_str(&format!(" <{payload:02x?}>"));
                }
                seen.push(seen_line);

                match answer {
                    Answer::Ascii(text) => {
                        writer.write_all(b"\n").unwrap();
                        writer.write_all(text.as_bytes()).unwrap();
                        writer.write_all(b"\n").unwrap();
                    }
                    Answer::Binary(bytes) => {
                        writer.write_all(&[0]).unwrap();
                        writer
                            .write_all(&(bytes.len() as u32).to_be_bytes())
                            .unwrap();
                        writer.write_all(&bytes).unwrap();
                    }
                }
                writer.flush().unwrap();
            }
            seen
        });
        (Server { listener }, handle)
    }

    fn connect(&self) -> NwaClient {
        let addr = self.listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        NwaClient::from_stream(stream, Arc::new(Config::builtin().unwrap())).unwrap()
    }
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(5))
}

#[test]
fn core_read_returns_exact_bytes() {
    let (server, handle) = Server::start(vec![Answer::Binary(vec![0xDE, 0xAD, 0xBE, 0xEF])]);
    let mut client = server.connect();

    let reads = [MemoryReadRequest {
        address: AddressTuple::pak(0xF5_0010),
        size: 4,
    }];
    let responses = client.multi_read_memory(deadline(), &reads).expect("read");
    assert_eq!(responses[0].data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(responses[0].device_address.address, 0xF5_0010);

    drop(client);
    let seen = handle.join().unwrap();
    assert_eq!(seen, vec!["CORE_READ WRAM;$10;$4".to_owned()]);
}

#[test]
fn reads_group_by_memory_type_in_first_seen_order() {
    let (server, handle) = Server::start(vec![
        Answer::Binary(vec![1, 2, 3, 4]),
        Answer::Binary(vec![9, 9]),
    ]);
    let mut client = server.connect();

    let reads = [
        MemoryReadRequest {
            address: AddressTuple::pak(0xF5_0000),
            size: 2,
        },
        MemoryReadRequest {
            address: AddressTuple::pak(0xE0_0000),
            size: 2,
        },
        MemoryReadRequest {
            address: AddressTuple::pak(0xF5_0100),
            size: 2,
        },
    ];
    let responses = client.multi_read_memory(deadline(), &reads).expect("read");
    // WRAM group carried requests 0 and 2 back to back.
    assert_eq!(responses[0].data, vec![1, 2]);
    assert_eq!(responses[2].data, vec![3, 4]);
    assert_eq!(responses[1].data, vec![9, 9]);

    drop(client);
    let seen = handle.join().unwrap();
    assert_eq!(
        seen,
        vec![
            "CORE_READ WRAM;$0;$2;$100;$2".to_owned(),
            "CORE_READ CARTRAM;$0;$2".to_owned(),
        ]
    );
}

#[test]
fn short_binary_reply_leaves_tail_bytes_zero() {
    let (server, _handle) = Server::start(vec![Answer::Binary(vec![0xAA, 0xBB])]);
    let mut client = server.connect();

    let reads = [MemoryReadRequest {
        address: AddressTuple::pak(0xF5_0000),
        size: 6,
    }];
    let responses = client.multi_read_memory(deadline(), &reads).expect("read");
    assert_eq!(responses[0].data, vec![0xAA, 0xBB, 0, 0, 0, 0]);
}

#[test]
fn writes_send_binary_payloads_and_collect_acks() {
    let (server, handle) = Server::start(vec![Answer::Ascii("ok:1")]);
    let mut client = server.connect();

    let writes = [MemoryWriteRequest {
        address: AddressTuple::pak(0xF5_0010),
        data: vec![0x01, 0x02],
    }];
    client.multi_write_memory(deadline(), &writes).expect("write");

    drop(client);
    let seen = handle.join().unwrap();
    assert_eq!(seen, vec!["bCORE_WRITE WRAM;$10;$2 <[01, 02]>".to_owned()]);
}

#[test]
fn write_error_reply_is_non_fatal() {
    let (server, _handle) = Server::start(vec![Answer::Ascii("error:read only")]);
    let mut client = server.connect();

    let writes = [MemoryWriteRequest {
        address: AddressTuple::pak(0xF5_0010),
        data: vec![0x01],
    }];
    let err = client.multi_write_memory(deadline(), &writes).unwrap_err();
    assert!(!err.is_fatal());
    assert!(!client.is_closed());
}

fn discovery_script() -> Vec<Answer> {
    vec![
        Answer::Ascii("name:bsnes\nversion:115\nplatform:SNES"),
        Answer::Ascii(
            "name:SNES_WRAM\nsize:131072\naccess:rw\nname:SNES_VRAM\nsize:65536\naccess:r",
        ),
    ]
}

#[test]
fn core_discovery_projects_canonical_domains() {
    let mut script = discovery_script();
    script.push(Answer::Binary(vec![0x42; 4]));
    let (server, handle) = Server::start(script);
    let mut client = server.connect();

    let responses = client
        .multi_domain_read(
            deadline(),
            &[DomainReadRequest {
                domain: "WRAM".into(),
                reads: vec![(0x10, 4)],
            }],
        )
        .expect("domain read");
    assert_eq!(responses[0].reads[0].data, vec![0x42; 4]);

    drop(client);
    let seen = handle.join().unwrap();
    assert_eq!(
        seen,
        vec![
            "CORE_CURRENT_INFO".to_owned(),
            "CORE_MEMORIES".to_owned(),
            "CORE_READ SNES_WRAM;$10;$4".to_owned(),
        ]
    );
}

#[test]
fn memory_domains_reports_discovered_access() {
    let (server, _handle) = Server::start(discovery_script());
    let mut client = server.connect();

    let domains = client.memory_domains(deadline()).expect("domains");
    let wram = domains.iter().find(|d| d.name == "WRAM").unwrap();
    assert!(wram.is_exposed);
    assert_eq!(wram.size, 0x2_0000);
    assert!(wram.is_readable);
    assert!(wram.is_writeable);

    let vram = domains.iter().find(|d| d.name == "VRAM").unwrap();
    assert!(vram.is_exposed);
    assert!(vram.is_readable);
    assert!(!vram.is_writeable);

    // Domains the core never reported stay visible but unexposed.
    let oam = domains.iter().find(|d| d.name == "OAM").unwrap();
    assert!(!oam.is_exposed);
}

#[test]
fn memory_domains_rediscovers_every_call() {
    let mut script = discovery_script();
    script.extend(discovery_script());
    let (server, handle) = Server::start(script);
    let mut client = server.connect();

    let first = client.memory_domains(deadline()).expect("first");
    let second = client.memory_domains(deadline()).expect("second");
    assert_eq!(first, second);

    drop(client);
    let seen = handle.join().unwrap();
    // Two full discovery sequences hit the wire.
    assert_eq!(
        seen.iter().filter(|l| *l == "CORE_MEMORIES").count(),
        2
    );
}

#[test]
fn unknown_domain_name_is_invalid_argument() {
    let (server, _handle) = Server::start(discovery_script());
    let mut client = server.connect();

    let err = client
        .multi_domain_read(
            deadline(),
            &[DomainReadRequest {
                domain: "NOT_A_DOMAIN".into(),
                reads: vec![(0, 1)],
            }],
        )
        .unwrap_err();
    assert!(matches!(err, DeviceError::InvalidArgument(_)));
    assert!(!client.is_closed());
}

#[test]
fn domain_range_checks_reject_before_io() {
    let (server, _handle) = Server::start(discovery_script());
    let mut client = server.connect();

    let err = client
        .multi_domain_write(
            deadline(),
            &[DomainWriteRequest {
                domain: "WRAM".into(),
                writes: vec![DomainOffsetData {
                    offset: 0x2_0000 - 2,
                    data: vec![0; 3],
                }],
            }],
        )
        .unwrap_err();
    assert!(matches!(err, DeviceError::InvalidArgument(_)));
}

#[test]
fn unmatched_core_is_a_precondition_failure_and_survives() {
    let (server, _handle) = Server::start(vec![Answer::Ascii(
        "name:unknowncore\nversion:1\nplatform:SNES",
    )]);
    let mut client = server.connect();

    let err = client.memory_domains(deadline()).unwrap_err();
    assert!(matches!(err, DeviceError::FailedPrecondition(_)));
    assert!(!client.is_closed());
}

#[test]
fn fetch_fields_coalesces_per_info_family() {
    let (server, handle) = Server::start(vec![
        Answer::Ascii("name:bsnes\nversion:115\nplatform:SNES"),
        Answer::Ascii("name:bsnes-emulator\nversion:115.3"),
    ]);
    let mut client = server.connect();

    let values = client
        .fetch_fields(
            deadline(),
            &[
                Field::CoreName,
                Field::CorePlatform,
                Field::DeviceName,
                Field::CoreVersion,
            ],
        )
        .expect("fields");
    assert_eq!(values, vec!["bsnes", "SNES", "bsnes-emulator", "115"]);

    drop(client);
    let seen = handle.join().unwrap();
    // One CORE_CURRENT_INFO and one EMULATOR_INFO, nothing else.
    assert_eq!(
        seen,
        vec!["CORE_CURRENT_INFO".to_owned(), "EMULATOR_INFO".to_owned()]
    );
}

#[test]
fn pause_and_reset_pass_through() {
    let (server, handle) = Server::start(vec![
        Answer::Ascii("ok:1"),
        Answer::Ascii("ok:1"),
        Answer::Ascii("ok:1"),
    ]);
    let mut client = server.connect();

    client.reset_system(deadline()).expect("reset");
    assert!(client.pause_unpause(deadline(), true).expect("pause"));
    assert!(!client.pause_unpause(deadline(), false).expect("resume"));

    drop(client);
    let seen = handle.join().unwrap();
    assert_eq!(
        seen,
        vec![
            "EMULATION_RESET".to_owned(),
            "EMULATION_PAUSE".to_owned(),
            "EMULATION_RESUME".to_owned(),
        ]
    );
}
