//! End-to-end tests against a simulated PLC.
//!
//! A `tokio-modbus` TCP server with the register layout of the line PLC runs
//! on a background thread with its own runtime, while the synchronous client
//! side is driven from the test thread.
#![cfg(feature = "safe-client-sync")]

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::{mpsc, Arc, Mutex},
    time::Duration,
};

use tokio::net::TcpListener;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};

use lineplc_lib::{
    protocol::{self as proto, GateState},
    tokio_common::ConnectionConfig,
    tokio_sync_safe_client::SafeClient,
    session::{RegisterBus, Session},
    tokio_common::Error,
    transaction::{self, WriteError},
};

#[derive(Default)]
struct PlcState {
    holding_registers: HashMap<u16, u16>,
    /// Requests starting at one of these addresses are answered with an exception.
    failing: HashSet<u16>,
    /// Requests starting at one of these addresses are answered late.
    delayed: HashMap<u16, Duration>,
}

#[derive(Clone)]
struct SimulatedPlc {
    state: Arc<Mutex<PlcState>>,
}

impl tokio_modbus::server::Service for SimulatedPlc {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Exception>> + Send>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let mut state = self.state.lock().unwrap();
        let delay = match &req {
            Request::ReadHoldingRegisters(addr, _)
            | Request::WriteMultipleRegisters(addr, _)
            | Request::WriteSingleRegister(addr, _) => state.delayed.get(addr).copied(),
            _ => None,
        };
        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => {
                register_read(&state, addr, cnt).map(Response::ReadHoldingRegisters)
            }
            Request::WriteMultipleRegisters(addr, values) => {
                register_write(&mut state, addr, &values)
                    .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16))
            }
            Request::WriteSingleRegister(addr, value) => {
                register_write(&mut state, addr, std::slice::from_ref(&value))
                    .map(|_| Response::WriteSingleRegister(addr, value))
            }
            _ => Err(ExceptionCode::IllegalFunction),
        };
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            res
        })
    }
}

fn register_read(state: &PlcState, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
    if state.failing.contains(&addr) {
        return Err(ExceptionCode::ServerDeviceFailure);
    }
    (addr..addr + cnt)
        .map(|reg| {
            state
                .holding_registers
                .get(&reg)
                .copied()
                .ok_or(ExceptionCode::IllegalDataAddress)
        })
        .collect()
}

fn register_write(state: &mut PlcState, addr: u16, values: &[u16]) -> Result<(), ExceptionCode> {
    if state.failing.contains(&addr) {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    for (i, value) in values.iter().enumerate() {
        let reg = addr + i as u16;
        match state.holding_registers.get_mut(&reg) {
            Some(r) => *r = *value,
            None => return Err(ExceptionCode::IllegalDataAddress),
        }
    }
    Ok(())
}

fn line_plc_state() -> PlcState {
    let mut state = PlcState::default();
    let mut load = |start: u16, words: &[u16]| {
        for (offset, word) in words.iter().enumerate() {
            state.holding_registers.insert(start + offset as u16, *word);
        }
    };

    let mut status = [0u16; 30];
    status[0] = 2;
    status[1] = 1;
    status[2] = 0;
    status[10] = 1;
    status[12] = 1200;
    status[20] = 75;
    status[22] = 76;
    status[24] = 50;
    load(0, &status);
    load(70, &[0; 4]);
    load(90, &[2024, 5, 1, 10, 30, 0, 0]);
    load(100, &proto::encode_identifier("P001").unwrap());
    state
}

/// Starts the simulated PLC and returns its address and shared state.
fn start_plc(state: PlcState) -> (SocketAddr, Arc<Mutex<PlcState>>) {
    let state = Arc::new(Mutex::new(state));
    let server_state = state.clone();
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();

            let server = Server::new(listener);
            let new_service = move |_socket_addr: SocketAddr| {
                Ok(Some(SimulatedPlc {
                    state: server_state.clone(),
                }))
            };
            let on_connected = move |stream: tokio::net::TcpStream, socket_addr: SocketAddr| {
                let new_service = new_service.clone();
                async move { accept_tcp_connection(stream, socket_addr, new_service) }
            };
            let on_process_error = |err| {
                eprintln!("Server error: {err}");
            };
            if let Err(err) = server.serve(&on_connected, on_process_error).await {
                eprintln!("Server error: {err}");
            }
        });
    });

    let addr = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    (addr, state)
}

fn config_for(addr: SocketAddr) -> ConnectionConfig {
    ConnectionConfig::new(addr.ip().to_string(), addr.port()).with_timeout(Duration::from_secs(2))
}

#[test]
fn full_transaction() {
    let (addr, state) = start_plc(line_plc_state());
    let result = transaction::operate(&config_for(addr), &[1, 2, 3, 4]);

    assert!(result.connected);
    assert!(result.fatal_error.is_none());
    assert!(result.is_complete(), "{result}");

    let snapshot = result.snapshot().unwrap();
    assert_eq!(
        snapshot.gate_states,
        [GateState::Open, GateState::Closed, GateState::Indeterminate]
    );
    assert!(snapshot.motor_on);
    assert_eq!(snapshot.motor_speed, 1200);
    assert_eq!(snapshot.temperatures, [75, 76, 50]);
    assert_eq!(snapshot.timestamp.to_string(), "2024-05-01 10:30:00.0");
    assert_eq!(snapshot.product_code, "P001");

    let state = state.lock().unwrap();
    let written: Vec<u16> = (70..74).map(|reg| state.holding_registers[&reg]).collect();
    assert_eq!(written, vec![1, 2, 3, 4]);
}

#[test]
fn rejected_write_keeps_readings() {
    let mut plc = line_plc_state();
    plc.failing.insert(proto::WRITE_RANGE.start_address);
    let (addr, _state) = start_plc(plc);

    let result = transaction::operate(&config_for(addr), &[1, 1, 1, 1]);
    assert!(result.connected);
    assert!(matches!(
        result.write,
        Some(Err(WriteError::DeviceRejected(_)))
    ));
    assert!(matches!(result.status, Some(Ok(_))));
    assert!(matches!(result.clock, Some(Ok(_))));
    assert_eq!(
        result.identifier.as_ref().unwrap().as_ref().unwrap(),
        "P001"
    );
}

#[test]
fn failed_identifier_read_keeps_telemetry() {
    let mut plc = line_plc_state();
    plc.failing.insert(proto::IDENTIFIER_RANGE.start_address);
    let (addr, _state) = start_plc(plc);

    let result = transaction::operate(&config_for(addr), &[1, 1, 1, 1]);
    assert!(matches!(result.write, Some(Ok(()))));
    let status = result.status.as_ref().unwrap().as_ref().unwrap();
    assert_eq!(status.temperatures, [75, 76, 50]);
    assert!(status.motor_on);
    let err = result.identifier.as_ref().unwrap().as_ref().unwrap_err();
    assert_eq!(err.range, proto::RangeKind::Identifier);
    assert_eq!(err.reason(), "exception");
    assert!(result.snapshot().is_none());
}

#[test]
fn safe_client_operations() {
    let (addr, state) = start_plc(line_plc_state());
    let client = SafeClient::new(config_for(addr));

    assert_eq!(client.read_product_code().unwrap(), "P001");
    assert_eq!(client.read_clock().unwrap().year, 2024);
    assert_eq!(client.read_status().unwrap().motor_speed, 1200);

    client.write_control_value(1, 42).unwrap();
    assert_eq!(state.lock().unwrap().holding_registers[&71], 42);

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let client = client.clone();
            std::thread::spawn(move || client.operate(&[i, i, i, i]))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().is_complete());
    }
}

#[test]
fn late_reply_does_not_leak_into_next_read() {
    let mut plc = line_plc_state();
    plc.delayed
        .insert(proto::STATUS_RANGE.start_address, Duration::from_millis(400));
    let (addr, _state) = start_plc(plc);
    let config = config_for(addr).with_timeout(Duration::from_millis(150));

    let result = transaction::operate(&config, &[1, 1, 1, 1]);
    assert!(result.connected);
    assert!(matches!(result.write, Some(Ok(()))));
    let err = result.status.as_ref().unwrap().as_ref().unwrap_err();
    assert_eq!(err.reason(), "timeout");
    assert_eq!(
        result.clock.as_ref().unwrap().as_ref().unwrap().to_string(),
        "2024-05-01 10:30:00.0"
    );
    assert_eq!(
        result.identifier.as_ref().unwrap().as_ref().unwrap(),
        "P001"
    );
}

#[test]
fn late_write_reply_is_a_timeout() {
    let mut plc = line_plc_state();
    plc.delayed
        .insert(proto::WRITE_RANGE.start_address, Duration::from_millis(400));
    let (addr, _state) = start_plc(plc);
    let config = config_for(addr).with_timeout(Duration::from_millis(150));

    let mut session = Session::open(&config).unwrap();
    let result = transaction::execute(&mut session, &[5, 6, 7, 8]);
    let err = result.write.as_ref().unwrap().as_ref().unwrap_err();
    assert_eq!(err.reason(), "device_rejected");
    assert!(err.is_timeout());
    assert!(matches!(result.status, Some(Ok(_))));
    assert!(result.snapshot().is_some());
    assert!(session.is_open());

    session.close();
    assert!(!session.is_open());
    assert!(matches!(
        session.read_range(&proto::STATUS_RANGE),
        Err(Error::SessionClosed)
    ));
}

#[test]
fn stalled_plc_times_out_every_step() {
    // Connections complete through the listen backlog, but nothing is ever answered.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let config =
        config_for(listener.local_addr().unwrap()).with_timeout(Duration::from_millis(150));

    let result = transaction::operate(&config, &[1, 1, 1, 1]);
    assert!(result.connected);
    assert!(result.fatal_error.is_none());
    assert!(result.write.as_ref().unwrap().as_ref().unwrap_err().is_timeout());
    for err in [
        result.status.as_ref().unwrap().as_ref().err().map(|err| err.reason()),
        result.clock.as_ref().unwrap().as_ref().err().map(|err| err.reason()),
        result.identifier.as_ref().unwrap().as_ref().err().map(|err| err.reason()),
    ] {
        assert_eq!(err, Some("timeout"));
    }
}
