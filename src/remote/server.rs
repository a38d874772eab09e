use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info, trace, warn};
use vdtap::device::{CaptureEngine, DeviceEvent};
use vdtap::process::decode::DecodedFrame;
use vdtap::process::pipeline::CapturePipeline;
use vdtap::structs::palette::PaletteKind;
use vdtap::structs::register::Register;
use vdtap::structs::status::VideoChipType;
use vdtap::utils::errors::DeviceError;

use super::protocol::{DeviceAccess, Request, respond};

/// The board as seen by the server: the current capture session, if any,
/// and the last frame it decoded.
pub struct LiveDevice {
    engine: Mutex<Option<Arc<CaptureEngine>>>,
    latest: Mutex<Option<Arc<DecodedFrame>>>,
    palette: PaletteKind,
    cropped: bool,
}

impl LiveDevice {
    pub fn new(palette: PaletteKind, cropped: bool) -> Self {
        Self {
            engine: Mutex::new(None),
            latest: Mutex::new(None),
            palette,
            cropped,
        }
    }

    fn engine(&self) -> Option<Arc<CaptureEngine>> {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn attach(&self, engine: Arc<CaptureEngine>) {
        *self.engine.lock().unwrap_or_else(PoisonError::into_inner) = Some(engine);
    }

    /// Forgets the session and its last frame.
    fn detach(&self) {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn set_latest(&self, frame: DecodedFrame) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(frame));
    }
}

impl DeviceAccess for LiveDevice {
    fn chip_type(&self) -> Option<VideoChipType> {
        self.engine()?.chip_type()
    }

    fn latest_png(&self) -> Option<Vec<u8>> {
        let frame = self
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;

        match frame.encode_png(self.palette, self.cropped) {
            Ok(png) => Some(png),
            Err(e) => {
                warn!("Failed to encode frame: {e}");
                None
            }
        }
    }

    fn bus_read(&self, register: Register) -> Result<u8, DeviceError> {
        self.engine().ok_or(DeviceError::Closed)?.bus_read(register)
    }

    fn bus_write(&self, register: Register, value: u8) -> Result<(), DeviceError> {
        self.engine()
            .ok_or(DeviceError::Closed)?
            .bus_write(register, value)
    }
}

/// Runs capture sessions for `device`, one after the other.
///
/// `open` is called again `reconnect` after every failed attempt or ended
/// session; without an interval the loop returns after the first one.
pub fn run_capture_loop<F>(device: &LiveDevice, mut open: F, reconnect: Option<Duration>)
where
    F: FnMut() -> Result<(CaptureEngine, Receiver<DeviceEvent>), DeviceError>,
{
    let mut reported = false;

    loop {
        match open() {
            Ok((engine, events)) => {
                reported = false;
                let engine = Arc::new(engine);
                let status = engine.status().unwrap_or_default();
                info!(
                    "Capture device connected: {}, {} in {}",
                    engine.chip_type().map_or("unknown chip", |chip| chip.name()),
                    status.channels,
                    status.mode
                );

                device.attach(engine.clone());
                capture_session(device, &engine, &events);
                device.detach();
                engine.close();
            }
            Err(e) if !reported => {
                warn!("Capture device unavailable: {e}");
                reported = true;
            }
            Err(e) => debug!("Capture device still unavailable: {e}"),
        }

        let Some(interval) = reconnect else {
            return;
        };
        thread::sleep(interval);
    }
}

fn capture_session(device: &LiveDevice, engine: &CaptureEngine, events: &Receiver<DeviceEvent>) {
    let status = engine.status().unwrap_or_default();
    let mut pipeline = CapturePipeline::new(status).with_buffer_pool(engine.sample_buffers());

    while let Ok(event) = events.recv() {
        if let Err(e) = pipeline.handle_event(event, |frame| device.set_latest(frame)) {
            warn!("Capture device lost: {e}");
            return;
        }
    }
}

/// Accepts clients forever, one thread each.
pub fn serve<D>(listener: TcpListener, device: Arc<D>)
where
    D: DeviceAccess + 'static,
{
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to accept connection: {e}");
                continue;
            }
        };

        let device = device.clone();
        thread::spawn(move || {
            let peer = stream
                .peer_addr()
                .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
            info!("Client {peer} connected");
            if let Err(e) = handle_client(stream, device.as_ref()) {
                debug!("Client {peer}: {e}");
            }
            info!("Client {peer} disconnected");
        });
    }
}

fn handle_client<D: DeviceAccess + ?Sized>(stream: TcpStream, device: &D) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let reader = BufReader::new(stream.try_clone()?);
    serve_lines(reader, stream, device)
}

/// Answers every request line of `reader` on `writer` until EOF.
pub fn serve_lines<R, W, D>(mut reader: R, mut writer: W, device: &D) -> io::Result<()>
where
    R: BufRead,
    W: Write,
    D: DeviceAccess + ?Sized,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }

        let text = String::from_utf8_lossy(&line);
        let request = Request::parse(&text);
        trace!("{:?} -> {request:?}", text.trim());

        let reply = respond(request, device);
        if !reply.is_empty() {
            writer.write_all(reply.as_bytes())?;
            writer.flush()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::protocol::tests::FakeDevice;
    use crate::remote::protocol::{INVALID_REQUEST, NOT_CONNECTED};
    use std::io::{Cursor, Read};
    use std::time::Instant;
    use vdtap::device::backend::TransferStatus;
    use vdtap::device::mock::MockBackend;
    use vdtap::device::{Endpoint, EngineConfig};

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn answers_each_line() -> anyhow::Result<()> {
        let device = FakeDevice::connected();
        let input = Cursor::new("TYPE?\r\nR1=05\nR1?\n\nRGB?\nnonsense\n");
        let mut output = Vec::new();

        serve_lines(input, &mut output, &device)?;

        let expected = format!("TS9347\n05\n{INVALID_REQUEST}\n{INVALID_REQUEST}");
        assert_eq!(String::from_utf8(output)?, expected);
        Ok(())
    }

    #[test]
    fn serves_over_tcp() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let device = Arc::new(FakeDevice::default());
        thread::spawn(move || serve(listener, device));

        let mut client = TcpStream::connect(addr)?;
        client.write_all(b"TYPE?\nR0?\n")?;
        client.shutdown(std::net::Shutdown::Write)?;

        let mut reply = String::new();
        client.read_to_string(&mut reply)?;
        assert_eq!(reply, format!("{NOT_CONNECTED}{NOT_CONNECTED}"));
        Ok(())
    }

    #[test]
    fn capture_loop_tracks_session() -> anyhow::Result<()> {
        let backend = MockBackend::default();
        let handle = backend.handle();
        handle.set_register(0x03, 0x5A);

        let config = EngineConfig {
            sample_transfers: 2,
            packets_per_transfer: 1,
            packet_size: 64,
            status_transfers: 1,
        };
        let device = Arc::new(LiveDevice::new(PaletteKind::RgbInsert, true));

        let mut backend = Some(backend);
        let loop_device = device.clone();
        let worker = thread::spawn(move || {
            run_capture_loop(
                &loop_device,
                || match backend.take() {
                    Some(backend) => CaptureEngine::open(backend, &config),
                    None => Err(DeviceError::Closed),
                },
                None,
            )
        });

        assert!(wait_until(|| device.chip_type().is_some()));
        assert_eq!(respond(Request::ChipType, device.as_ref()), "EF9345\n");
        assert_eq!(respond(Request::Read(Register::new(3, false)?), device.as_ref()), "5A\n");
        assert_eq!(respond(Request::Image, device.as_ref()), "\n");

        handle.complete(Endpoint::Samples, TransferStatus::Failed, &[]);
        worker.join().expect("capture loop panicked");

        assert_eq!(device.chip_type(), None);
        assert_eq!(
            respond(Request::Read(Register::new(3, false)?), device.as_ref()),
            NOT_CONNECTED
        );
        Ok(())
    }

    #[test]
    fn latest_frame_is_served_as_png() -> anyhow::Result<()> {
        use vdtap::process::decode::FrameDecoder;
        use vdtap::structs::frame::RawFrame;
        use vdtap::structs::status::ChipStatus;

        let device = LiveDevice::new(PaletteKind::Grayscale, false);
        assert_eq!(device.latest_png(), None);

        let frame = FrameDecoder::default().decode(
            &RawFrame::from_rows(&[vec![0u8; 16], vec![0x0F; 16]]),
            ChipStatus::default(),
        );
        device.set_latest(frame);

        let png = device.latest_png().expect("png");
        assert_eq!(&png[..4], b"\x89PNG");
        Ok(())
    }
}
