use cantabile_ports::midi::{MidiError, MidiEvent, MidiEventKind, MidiOutputConnection, MidiOutputPort};
use cantabile_ports::types::{DeviceId, MidiOutputDevice, Volume01};
use midir::MidiOutput;

pub struct MidirMidiOutputPort {
    client_name: String,
}

impl MidirMidiOutputPort {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn create_midi_out(&self) -> Result<MidiOutput, MidiError> {
        MidiOutput::new(&self.client_name).map_err(|e| MidiError::Backend(e.to_string()))
    }

    fn device_id(index: usize, name: &str) -> DeviceId {
        DeviceId(format!("midir:{}:{}", index, name))
    }
}

impl Default for MidirMidiOutputPort {
    fn default() -> Self {
        Self::new("Cantabile")
    }
}

pub struct MidirMidiOutputConnection {
    connection: Option<midir::MidiOutputConnection>,
    volume: Volume01,
}

impl MidirMidiOutputConnection {
    fn scale(&self, event: &MidiEvent) -> MidiEvent {
        if event.kind != MidiEventKind::NoteOn || event.data2 == 0 {
            return *event;
        }
        let velocity = (event.data2 as f32 * self.volume.get()).round() as u8;
        MidiEvent {
            data2: velocity.min(127),
            ..*event
        }
    }
}

impl MidiOutputConnection for MidirMidiOutputConnection {
    fn send(&mut self, event: &MidiEvent) -> Result<(), MidiError> {
        let bytes = self.scale(event).to_bytes();
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| MidiError::DeviceUnavailable("connection closed".to_string()))?;
        connection
            .send(&bytes)
            .map_err(|e| MidiError::Backend(e.to_string()))
    }

    fn set_volume(&mut self, volume: Volume01) {
        self.volume = volume;
    }

    fn close(mut self: Box<Self>) {
        if let Some(connection) = self.connection.take() {
            let _ = connection.close();
        }
    }
}

impl MidiOutputPort for MidirMidiOutputPort {
    fn list_outputs(&self) -> Result<Vec<MidiOutputDevice>, MidiError> {
        let midi_out = self.create_midi_out()?;
        let ports = midi_out.ports();
        let mut devices = Vec::new();

        for (index, port) in ports.iter().enumerate() {
            let name = midi_out
                .port_name(port)
                .unwrap_or_else(|_| "Unknown Output".to_string());
            devices.push(MidiOutputDevice {
                index,
                id: Self::device_id(index, &name),
                name,
            });
        }

        Ok(devices)
    }

    fn open_output(&self, index: usize) -> Result<Box<dyn MidiOutputConnection>, MidiError> {
        let midi_out = self.create_midi_out()?;
        let ports = midi_out.ports();
        let port = ports
            .get(index)
            .cloned()
            .ok_or_else(|| MidiError::DeviceNotFound(format!("output #{index}")))?;
        let name = midi_out
            .port_name(&port)
            .unwrap_or_else(|_| "Unknown Output".to_string());

        let connection = midi_out
            .connect(&port, "cantabile-midi-output")
            .map_err(|e| MidiError::DeviceUnavailable(e.to_string()))?;
        tracing::info!(index, name = %name, "midi output opened");

        Ok(Box::new(MidirMidiOutputConnection {
            connection: Some(connection),
            volume: Volume01::new(1.0),
        }))
    }
}
