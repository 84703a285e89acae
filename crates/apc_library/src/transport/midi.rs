use super::{ConnectionState, Connector, InboundMessage, Transport};
use crate::error::TransportError;
use crossbeam_channel::{Sender, TrySendError};
use midir::{Ignore, MidiIO, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

/// Which ports to open. Names match by case-insensitive substring, so
/// `"APC mini"` finds `"APC mini mk2:APC mini mk2 Control 24:0"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortSelection {
    pub client_name: String,
    pub input_port: String,
    pub output_port: String,
    /// Name of a virtual output that mirrors every inbound message.
    pub loopback: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortListing {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

pub fn list_ports(client_name: &str) -> Result<PortListing, TransportError> {
    let input = MidiInput::new(client_name).map_err(|e| TransportError::Open(e.to_string()))?;
    let output = MidiOutput::new(client_name).map_err(|e| TransportError::Open(e.to_string()))?;
    Ok(PortListing {
        inputs: port_names(&input),
        outputs: port_names(&output),
    })
}

fn port_names<T: MidiIO>(io: &T) -> Vec<String> {
    io.ports().iter().filter_map(|p| io.port_name(p).ok()).collect()
}

fn find_port<T: MidiIO>(io: &T, wanted: &str) -> Result<T::Port, TransportError> {
    let wanted_lower = wanted.to_lowercase();
    io.ports()
        .into_iter()
        .find(|p| {
            io.port_name(p)
                .map(|name| name.to_lowercase().contains(&wanted_lower))
                .unwrap_or(false)
        })
        .ok_or_else(|| TransportError::PortNotFound(wanted.to_string()))
}

/// Lives inside the input callback.
struct InputState {
    inbound: Sender<InboundMessage>,
    loopback: Option<MidiOutputConnection>,
    dropped: u64,
}

impl InputState {
    fn receive(&mut self, message: &[u8]) {
        if let Some(loopback) = self.loopback.as_mut() {
            if let Err(e) = loopback.send(message) {
                log::debug!("loopback send failed: {e}");
            }
        }
        match self.inbound.try_send(InboundMessage::new(message)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped.is_power_of_two() {
                    log::warn!("input queue full, {} messages dropped so far", self.dropped);
                }
            }
            // Engine is shutting down.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

pub struct MidiOutputTransport {
    connection: MidiOutputConnection,
    state: ConnectionState,
    client_name: String,
    port_name: String,
}

impl Transport for MidiOutputTransport {
    fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        self.connection.send(message).map_err(|e| {
            let e = TransportError::Send(e.to_string());
            self.state = ConnectionState::Lost(e.to_string());
            e
        })
    }

    /// Also reports `Lost` once the port drops out of the system's port
    /// list, which is how an unplugged device shows up between writes.
    fn state(&self) -> ConnectionState {
        if self.state != ConnectionState::Connected {
            return self.state.clone();
        }
        match MidiOutput::new(&self.client_name) {
            Ok(output) if find_port(&output, &self.port_name).is_err() => {
                ConnectionState::Lost(format!("{} is gone", self.port_name))
            }
            Ok(_) => ConnectionState::Connected,
            Err(e) => {
                log::debug!("can't list ports: {e}");
                ConnectionState::Connected
            }
        }
    }
}

/// Opens the device's input and output ports. The input connection is held
/// here and reopened along with the output on every reconnect.
pub struct MidiConnector {
    selection: PortSelection,
    inbound: Sender<InboundMessage>,
    input: Option<MidiInputConnection<InputState>>,
}

impl MidiConnector {
    pub fn new(selection: PortSelection, inbound: Sender<InboundMessage>) -> Self {
        Self {
            selection,
            inbound,
            input: None,
        }
    }

    fn open_loopback(&self) -> Result<Option<MidiOutputConnection>, TransportError> {
        let Some(name) = &self.selection.loopback else {
            return Ok(None);
        };
        let output = MidiOutput::new(&format!("{} Loopback", self.selection.client_name))
            .map_err(|e| TransportError::Open(e.to_string()))?;
        create_virtual(output, name).map(Some)
    }

    fn open_input(&self) -> Result<MidiInputConnection<InputState>, TransportError> {
        let mut input = MidiInput::new(&format!("{} In", self.selection.client_name))
            .map_err(|e| TransportError::Open(e.to_string()))?;
        // Clock drives the tempo follower; active sensing is noise.
        input.ignore(Ignore::ActiveSense);
        let port = find_port(&input, &self.selection.input_port)?;
        let name = input.port_name(&port).unwrap_or_else(|_| self.selection.input_port.clone());
        let state = InputState {
            inbound: self.inbound.clone(),
            loopback: self.open_loopback()?,
            dropped: 0,
        };
        let connection = input
            .connect(&port, "apc-in", |_stamp, message, state: &mut InputState| state.receive(message), state)
            .map_err(|e| TransportError::Open(format!("{name}: {e}")))?;
        log::info!("listening on {name}");
        Ok(connection)
    }

    fn open_output(&self) -> Result<MidiOutputTransport, TransportError> {
        let output = MidiOutput::new(&format!("{} Out", self.selection.client_name))
            .map_err(|e| TransportError::Open(e.to_string()))?;
        let port = find_port(&output, &self.selection.output_port)?;
        let name = output.port_name(&port).unwrap_or_else(|_| self.selection.output_port.clone());
        let connection = output
            .connect(&port, "apc-out")
            .map_err(|e| TransportError::Open(format!("{name}: {e}")))?;
        log::info!("sending to {name}");
        Ok(MidiOutputTransport {
            connection,
            state: ConnectionState::Connected,
            client_name: format!("{} Watch", self.selection.client_name),
            port_name: name,
        })
    }
}

impl Connector for MidiConnector {
    fn connect(&mut self) -> Result<Box<dyn Transport>, TransportError> {
        // Close first: the old input may still hold the port.
        if let Some(old) = self.input.take() {
            let _ = old.close();
        }
        let output = self.open_output()?;
        self.input = Some(self.open_input()?);
        Ok(Box::new(output))
    }
}

#[cfg(unix)]
fn create_virtual(output: MidiOutput, name: &str) -> Result<MidiOutputConnection, TransportError> {
    use midir::os::unix::VirtualOutput;
    output
        .create_virtual(name)
        .map_err(|e| TransportError::Open(format!("virtual port {name}: {e}")))
}

#[cfg(not(unix))]
fn create_virtual(_output: MidiOutput, name: &str) -> Result<MidiOutputConnection, TransportError> {
    Err(TransportError::Open(format!(
        "virtual port {name}: not supported on this platform"
    )))
}
