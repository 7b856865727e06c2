// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image reader: a scan session with a decoder attached.
//
// Session events are re-fired on the reader's own emitter, where the decoder
// listens for them.  The decoder fires `Line` and `Image` on the same
// emitter; since that happens during a dispatch, those events are delivered
// right after the event that produced them.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, warn};

use scanwerk_core::{ClientConfig, Result, ScanParameters, ScanwerkError, SessionId};
use scanwerk_engine::EngineHandle;
use scanwerk_scan::{Event, EventEmitter, ScanEvent, ScanEventKind, ScanRun, ScanSession};

use crate::decoder::{ImageDecoder, LineBlock, PixelBuffer};

/// Events fired by a `ScanImageReader`.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageEvent {
    Start {
        parameters: ScanParameters,
    },
    Data {
        parameters: ScanParameters,
        data: Vec<u8>,
    },
    Stop {
        parameters: Option<ScanParameters>,
        error: Option<ScanwerkError>,
    },
    /// One or more whole lines, in page order.
    Line {
        parameters: ScanParameters,
        block: LineBlock,
    },
    /// The finished page; only fired for scans that stopped without error.
    Image {
        parameters: ScanParameters,
        buffer: Arc<PixelBuffer>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEventKind {
    Start,
    Data,
    Stop,
    Line,
    Image,
}

impl Event for ImageEvent {
    type Kind = ImageEventKind;

    fn kind(&self) -> ImageEventKind {
        match self {
            Self::Start { .. } => ImageEventKind::Start,
            Self::Data { .. } => ImageEventKind::Data,
            Self::Stop { .. } => ImageEventKind::Stop,
            Self::Line { .. } => ImageEventKind::Line,
            Self::Image { .. } => ImageEventKind::Image,
        }
    }
}

impl From<&ScanEvent> for ImageEvent {
    fn from(event: &ScanEvent) -> Self {
        match event {
            ScanEvent::Start { parameters } => Self::Start {
                parameters: *parameters,
            },
            ScanEvent::Data { parameters, data } => Self::Data {
                parameters: *parameters,
                data: data.clone(),
            },
            ScanEvent::Stop { parameters, error } => Self::Stop {
                parameters: *parameters,
                error: error.clone(),
            },
        }
    }
}

/// Scan session that assembles an RGBA page while it reads.
#[derive(Debug)]
pub struct ScanImageReader {
    session: ScanSession,
    events: Arc<EventEmitter<ImageEvent>>,
}

impl ScanImageReader {
    pub fn new(engine: EngineHandle) -> Self {
        Self::with_config(engine, &ClientConfig::default())
    }

    pub fn with_config(engine: EngineHandle, config: &ClientConfig) -> Self {
        let session = ScanSession::with_config(engine, config);
        let events = Arc::new(EventEmitter::new());
        attach_decoder(&events);

        for kind in [ScanEventKind::Start, ScanEventKind::Data, ScanEventKind::Stop] {
            let target = Arc::clone(&events);
            session.on(kind, move |event| target.fire(ImageEvent::from(event)));
        }

        Self { session, events }
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    /// Register a listener. Decoder listeners always run first.
    pub fn on<F>(&self, kind: ImageEventKind, listener: F)
    where
        F: FnMut(&ImageEvent) -> Result<()> + Send + 'static,
    {
        self.events.on(kind, listener);
    }

    /// Start scanning; see `ScanSession::start`.
    pub fn start(&self) -> Result<ScanRun> {
        self.session.start()
    }

    pub fn cancel(&self) -> bool {
        self.session.cancel()
    }

    /// Run a complete scan and return the page.
    pub async fn scan(&self) -> Result<PixelBuffer> {
        let slot: Arc<Mutex<Option<Arc<PixelBuffer>>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        self.on(ImageEventKind::Image, move |event| {
            if let ImageEvent::Image { buffer, .. } = event {
                *sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(buffer));
            }
            Ok(())
        });

        self.start()?.wait().await?;

        let buffer = slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ScanwerkError::Decode("scan finished without an image".into()))?;
        Ok(Arc::unwrap_or_clone(buffer))
    }
}

/// Wire an `ImageDecoder` to `events`.
///
/// The listeners hold the emitter weakly; the emitter owns them.
fn attach_decoder(events: &Arc<EventEmitter<ImageEvent>>) {
    let decoder: Arc<Mutex<Option<ImageDecoder>>> = Arc::new(Mutex::new(None));

    let state = Arc::clone(&decoder);
    events.on(ImageEventKind::Start, move |event| {
        if let ImageEvent::Start { parameters } = event {
            let fresh = ImageDecoder::new(*parameters)?;
            *state.lock().unwrap_or_else(PoisonError::into_inner) = Some(fresh);
        }
        Ok(())
    });

    let state = Arc::clone(&decoder);
    let emitter = Arc::downgrade(events);
    events.on(ImageEventKind::Data, move |event| {
        let ImageEvent::Data { parameters, data } = event else {
            return Ok(());
        };
        let block = match state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            Some(decoder) => decoder.push(data)?,
            // Start was rejected; the session is already being cancelled.
            None => None,
        };
        match block {
            Some(block) => fire(&emitter, ImageEvent::Line {
                parameters: *parameters,
                block,
            }),
            None => Ok(()),
        }
    });

    let state = decoder;
    let emitter = Arc::downgrade(events);
    events.on(ImageEventKind::Stop, move |event| {
        let ImageEvent::Stop {
            parameters: Some(parameters),
            error: None,
        } = event
        else {
            return Ok(());
        };
        let Some(decoder) = state.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return Ok(());
        };
        if decoder.is_complete() {
            debug!(lines = decoder.lines_decoded(), "page assembled");
        } else {
            warn!(
                lines = decoder.lines_decoded(),
                declared = parameters.lines,
                "scan ended before the last line"
            );
        }
        fire(&emitter, ImageEvent::Image {
            parameters: *parameters,
            buffer: Arc::new(decoder.into_buffer()),
        })
    });
}

fn fire(emitter: &Weak<EventEmitter<ImageEvent>>, event: ImageEvent) -> Result<()> {
    match emitter.upgrade() {
        Some(emitter) => emitter.fire(event),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::{Frame, Operation, Status};
    use scanwerk_engine::{ReadStep, TestEngine};
    use scanwerk_scan::SessionState;

    fn gray(bytes_per_line: i32, lines: i32) -> ScanParameters {
        ScanParameters {
            format: Frame::Gray,
            last_frame: true,
            bytes_per_line,
            pixels_per_line: bytes_per_line,
            lines,
            depth: 8,
        }
    }

    async fn open(engine: TestEngine) -> EngineHandle {
        let handle = EngineHandle::new(engine);
        handle.init().expect("init");
        handle.open("test:0").await.expect("open");
        handle
    }

    fn kinds(reader: &ScanImageReader) -> Arc<Mutex<Vec<ImageEventKind>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            ImageEventKind::Start,
            ImageEventKind::Data,
            ImageEventKind::Stop,
            ImageEventKind::Line,
            ImageEventKind::Image,
        ] {
            let sink = Arc::clone(&log);
            reader.on(kind, move |event| {
                sink.lock().expect("log").push(event.kind());
                Ok(())
            });
        }
        log
    }

    #[tokio::test(start_paused = true)]
    async fn each_data_event_is_followed_by_its_lines() {
        let engine = TestEngine::new().with_image(gray(4, 2), &[1, 2, 3, 4, 5, 6, 7, 8], 3);
        let reader = ScanImageReader::new(open(engine).await);
        let log = kinds(&reader);

        let page = reader.scan().await.expect("scan");
        assert_eq!(page.pixel(2, 1), Some([7, 7, 7, 255]));

        use ImageEventKind::*;
        assert_eq!(
            *log.lock().expect("log"),
            vec![Start, Data, Data, Line, Data, Line, Stop, Image]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_parameters_abort_the_scan() {
        let mut parameters = gray(4, 2);
        parameters.depth = 16;
        let engine = TestEngine::new().with_parameters(parameters);
        let reader = ScanImageReader::new(open(engine).await);
        let log = kinds(&reader);

        let err = reader.scan().await.expect_err("16-bit");
        assert!(matches!(err, ScanwerkError::UnsupportedParameters { .. }));
        assert_eq!(reader.session().state(), SessionState::StoppedError);
        // The decoder rejected start before the user listener saw it.
        assert_eq!(*log.lock().expect("log"), vec![ImageEventKind::Stop]);
    }

    #[tokio::test(start_paused = true)]
    async fn page_too_large_to_allocate_cancels_the_scan() {
        let test_engine = Arc::new(TestEngine::new().with_parameters(gray(i32::MAX, i32::MAX)));
        let handle = EngineHandle::from_arc(test_engine.clone());
        handle.init().expect("init");
        handle.open("test:0").await.expect("open");
        let reader = ScanImageReader::new(handle);

        let err = reader.scan().await.expect_err("page too large");
        assert!(matches!(err, ScanwerkError::UnsupportedParameters { .. }), "{err:?}");
        assert_eq!(reader.session().state(), SessionState::StoppedError);
        assert!(test_engine.call_count(Operation::Cancel) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_scan_fires_no_image() {
        let engine = TestEngine::new().with_parameters(gray(2, 2)).with_reads(vec![
            ReadStep::Data(vec![1, 2]),
            ReadStep::Status(Status::IoError),
        ]);
        let reader = ScanImageReader::new(open(engine).await);
        let log = kinds(&reader);

        let err = reader.start().expect("start").wait().await.expect_err("io");
        assert_eq!(err, ScanwerkError::status(Operation::Read, Status::IoError));
        assert!(!log.lock().expect("log").contains(&ImageEventKind::Image));
        assert!(log.lock().expect("log").contains(&ImageEventKind::Line));
    }

    #[tokio::test(start_paused = true)]
    async fn data_past_the_last_line_fails_the_scan_without_an_image() {
        let engine = TestEngine::new()
            .with_parameters(gray(2, 1))
            .with_reads(vec![ReadStep::Data(vec![1, 2, 3, 4])]);
        let reader = ScanImageReader::new(open(engine).await);
        let log = kinds(&reader);

        let err = reader.scan().await.expect_err("too many lines");
        assert!(matches!(err, ScanwerkError::Decode(_)), "{err:?}");
        assert_eq!(reader.session().state(), SessionState::StoppedError);
        // The decoder failed first, so the user Data listener never ran.
        assert_eq!(
            *log.lock().expect("log"),
            vec![ImageEventKind::Start, ImageEventKind::Stop]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn image_listener_error_fails_the_scan() {
        let engine = TestEngine::new().with_image(gray(2, 2), &[1, 2, 3, 4], 4);
        let reader = ScanImageReader::new(open(engine).await);
        reader.on(ImageEventKind::Image, |_| {
            Err(ScanwerkError::Listener("thumbnail failed".into()))
        });

        let err = reader
            .start()
            .expect("start")
            .wait()
            .await
            .expect_err("image listener failed");
        assert_eq!(err, ScanwerkError::Listener("thumbnail failed".into()));
        assert_eq!(reader.session().state(), SessionState::StoppedError);
    }

    #[tokio::test(start_paused = true)]
    async fn line_events_cover_the_page_in_order() {
        let raw: Vec<u8> = (0..60).collect();
        let engine = TestEngine::new().with_image(gray(6, 10), &raw, 7);
        let reader = ScanImageReader::new(open(engine).await);

        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        reader.on(ImageEventKind::Line, move |event| {
            if let ImageEvent::Line { block, .. } = event {
                sink.lock().expect("lines").push((block.first_line, block.lines));
            }
            Ok(())
        });
        reader.scan().await.expect("scan");

        let mut next = 0;
        for (first, count) in lines.lock().expect("lines").iter() {
            assert_eq!(*first, next);
            next += count;
        }
        assert_eq!(next, 10);
    }
}
