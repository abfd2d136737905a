//! Session driver: performs the I/O of each state and feeds the outcome to
//! [`transition`].

use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;

use super::exchange::{ExchangeError, FrameExchanger};
use super::modem::{self, ModemSettings};
use super::state::{Effect, Event, FailureStage, RetryPolicy, SessionState, transition};
use super::{
    DEFAULT_ASSOCIATION_TIMEOUT, DEFAULT_LINK_TIMEOUT, DEFAULT_MODEM_TIMEOUT, DEFAULT_READ_TIMEOUT,
};
use crate::association::{self, Authentication};
use crate::axdr::decode_tags;
use crate::config::ObjectDescriptor;
use crate::get::{
    DEFAULT_INVOKE_ID, DataAccessResult, GET_RESPONSE_TAG, GetDataResult, GetRequest,
    GetRequestNext, GetRequestNormal, GetResponse,
};
use crate::hdlc::{
    Destination, FrameType, HdlcError, LLC_REQUEST, LinkState, MessageType, parse_llc_header,
};
use crate::obis_code::{InvalidLogicalName, ObisCode};
use crate::output::ObjectSink;
use crate::printer::Printer;
use crate::selective_access::ReadWindow;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("modem initialisation failed")]
    ModemInit,
    #[error("dialing failed")]
    Dial,
    #[error("no HDLC link with the meter")]
    Link,
    #[error("association failed")]
    Association,
}

impl From<FailureStage> for SessionError {
    fn from(stage: FailureStage) -> Self {
        match stage {
            FailureStage::Modem => Self::ModemInit,
            FailureStage::Dial => Self::Dial,
            FailureStage::Link => Self::Link,
            FailureStage::Association => Self::Association,
        }
    }
}

/// Failure of a single request or object read.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error("cannot encode request: {0}")]
    Encode(#[from] HdlcError),
    #[error("response without the LLC response header")]
    EnvelopeMismatch,
    #[error("undecodable response")]
    Decode,
    #[error("access denied: {0}")]
    AccessDenied(DataAccessResult),
    #[error("unsupported service tag 0x{0:02X}")]
    UnsupportedService(u8),
    #[error(transparent)]
    InvalidLogicalName(#[from] InvalidLogicalName),
    #[error("invalid attribute index {0}")]
    InvalidAttribute(i8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub modem: Duration,
    pub link: Duration,
    pub association: Duration,
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            modem: DEFAULT_MODEM_TIMEOUT,
            link: DEFAULT_LINK_TIMEOUT,
            association: DEFAULT_ASSOCIATION_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub authentication: Authentication,
    pub policy: RetryPolicy,
    pub timeouts: Timeouts,
    pub modem: Option<ModemSettings>,
    pub window: Option<ReadWindow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// Every object has been read.
    Complete,
}

/// What an object read got before it ended.
#[derive(Debug, Default)]
struct ReadProgress {
    data: Vec<u8>,
    exchanges: usize,
}

#[derive(Debug)]
pub struct Session<T, S> {
    transport: T,
    sink: S,
    link: LinkState,
    exchanger: FrameExchanger,
    state: SessionState,
    settings: SessionSettings,
    objects: Vec<ObjectDescriptor>,
}

impl<T, S> Session<T, S>
where
    T: Transport,
    S: ObjectSink,
{
    pub fn new(
        transport: T,
        sink: S,
        link: LinkState,
        settings: SessionSettings,
        objects: Vec<ObjectDescriptor>,
    ) -> Self {
        let state = SessionState::initial(settings.modem.is_some());
        Self { transport, sink, link, exchanger: FrameExchanger::new(), state, settings, objects }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn link(&self) -> &LinkState {
        &self.link
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Performs the work of the current state and advances the machine.
    pub fn step(&mut self) -> Result<Step, SessionError> {
        let event = match self.state {
            SessionState::ModemDisconnected { .. } => self.initialise_modem(),
            SessionState::ModemDialing { .. } => self.dial(),
            SessionState::LinkPending { .. } => self.establish_link(),
            SessionState::AssociationPending => self.associate(),
            SessionState::Associated { next_object } => {
                if next_object >= self.objects.len() {
                    return Ok(Step::Complete);
                }
                self.read_object(next_object);
                Event::ObjectDone
            }
            SessionState::Failed(stage) => return Err(stage.into()),
        };

        let (state, effect) = transition(self.state, event, &self.settings.policy);
        self.state = state;
        match effect {
            Some(Effect::ScanNextAddress) => {
                self.link.phy_address = self.link.phy_address.wrapping_add(1);
                info!("Trying physical address {}", self.link.phy_address);
            }
            Some(Effect::Fatal(stage)) => {
                error!("Giving up at {}", stage);
                return Err(stage.into());
            }
            None => {}
        }
        Ok(Step::Continue)
    }

    /// Steps until every object is read or a stage fails for good.
    pub fn run(&mut self) -> Result<(), SessionError> {
        while self.step()? == Step::Continue {}
        info!("All objects read");
        Ok(())
    }

    fn initialise_modem(&mut self) -> Event {
        let Some(settings) = &self.settings.modem else {
            return Event::ModemReady;
        };
        match modem::initialise(&mut self.transport, settings, self.settings.timeouts.modem) {
            Ok(()) => Event::ModemReady,
            Err(err) => {
                warn!("Modem: {}", err);
                Event::ModemFailed
            }
        }
    }

    fn dial(&mut self) -> Event {
        let Some(settings) = &self.settings.modem else {
            return Event::Dialed;
        };
        match modem::dial(&mut self.transport, settings, self.settings.timeouts.modem) {
            Ok(()) => Event::Dialed,
            Err(err) => {
                warn!("Dial: {}", err);
                Event::DialFailed
            }
        }
    }

    fn establish_link(&mut self) -> Event {
        info!("Sending SNRM to physical address {}", self.link.phy_address);
        let snrm = match self.link.encode_snrm() {
            Ok(frame) => frame,
            Err(err) => {
                error!("Cannot encode SNRM: {}", err);
                return Event::LinkFailed;
            }
        };

        let timeout = self.settings.timeouts.link;
        let exchanged = self.exchanger.exchange(&mut self.transport, &mut self.link, snrm, timeout);
        let info = match exchanged {
            Ok(info) => info,
            Err(err) => {
                warn!("No link: {}", err);
                return Event::LinkFailed;
            }
        };

        match self.exchanger.last_frame_type() {
            Some(FrameType::Ua) => {
                if let Err(err) = self.link.apply_ua(&info) {
                    warn!("Ignoring link parameters: {}", err);
                }
                info!("Link established: {:?}", self.link.parameters);
                Event::LinkEstablished
            }
            other => {
                warn!("Link refused: {:?}", other);
                Event::LinkFailed
            }
        }
    }

    fn associate(&mut self) -> Event {
        let aarq = match association::encode_aarq(&self.settings.authentication) {
            Ok(aarq) => aarq,
            Err(err) => {
                error!("Cannot build AARQ: {}", err);
                return Event::AssociationFailed;
            }
        };
        let apdu = match self.request(&aarq, self.settings.timeouts.association) {
            Ok(apdu) => apdu,
            Err(err) => {
                error!("No AARE: {}", err);
                return Event::AssociationFailed;
            }
        };
        let aare = match association::check_aare(&apdu) {
            Ok(aare) => aare,
            Err(err) => {
                error!("Association failed: {}", err);
                return Event::AssociationFailed;
            }
        };

        match aare.initiate_response {
            Some(initiate) => info!(
                "Associated (DLMS version {}, conformance {:06X}, max PDU {})",
                initiate.dlms_version, initiate.conformance, initiate.max_pdu_size
            ),
            None => info!("Associated"),
        }
        Event::AssociationAccepted
    }

    /// Sends an APDU in one I-frame and returns the APDU of the response.
    fn request(&mut self, apdu: &[u8], timeout: Duration) -> Result<Vec<u8>, ReadError> {
        let mut info = Vec::with_capacity(apdu.len() + LLC_REQUEST.len());
        info.extend_from_slice(&LLC_REQUEST);
        info.extend_from_slice(apdu);
        let frame = self.link.encode_info(&info)?;

        let payload =
            self.exchanger.exchange(&mut self.transport, &mut self.link, frame, timeout)?;
        let (apdu, header) =
            parse_llc_header(&payload).map_err(|_| ReadError::EnvelopeMismatch)?;
        if header.destination != Destination::Unicast
            || header.message_type != MessageType::Response
        {
            return Err(ReadError::EnvelopeMismatch);
        }
        Ok(apdu.to_vec())
    }

    fn read_object(&mut self, index: usize) {
        let object = self.objects[index].clone();
        let logical_name = match object.logical_name.parse::<ObisCode>() {
            Ok(logical_name) => logical_name,
            Err(err) => {
                warn!("Skipping {}: {}", object.name, ReadError::from(err));
                return;
            }
        };
        let Ok(attribute_id) = u8::try_from(object.attribute_id) else {
            warn!("Skipping {}: {}", object.name, ReadError::InvalidAttribute(object.attribute_id));
            return;
        };
        info!(
            "Reading {} ({}, class {}, attribute {})",
            object.name, logical_name, object.class_id, object.attribute_id
        );

        let mut progress = ReadProgress::default();
        match self.read_attribute(&object, logical_name, attribute_id, &mut progress) {
            Ok(()) => self.emit(&object, &progress.data),
            Err(ReadError::AccessDenied(result)) => {
                warn!("{}: {}", object.name, result);
                self.emit(&object, &progress.data);
            }
            Err(ReadError::Exchange(err)) if progress.exchanges > 0 => {
                warn!("{}: read interrupted: {}", object.name, err);
                self.emit(&object, &progress.data);
            }
            Err(err) => error!("{}: {}", object.name, err),
        }
    }

    fn read_attribute(
        &mut self,
        object: &ObjectDescriptor,
        logical_name: ObisCode,
        attribute_id: u8,
        progress: &mut ReadProgress,
    ) -> Result<(), ReadError> {
        let access_selection = self
            .settings
            .window
            .filter(|_| ReadWindow::applies_to(object.class_id, attribute_id))
            .map(|window| window.access_selector());

        let mut request = GetRequest::Normal(GetRequestNormal {
            invoke_id: DEFAULT_INVOKE_ID,
            class_id: object.class_id,
            instance_id: logical_name,
            attribute_id,
            access_selection,
        });

        loop {
            let apdu = self.request(&request.encode(), self.settings.timeouts.read)?;
            progress.exchanges += 1;

            match apdu.first() {
                Some(&GET_RESPONSE_TAG) => {}
                Some(&tag) => return Err(ReadError::UnsupportedService(tag)),
                None => return Err(ReadError::Decode),
            }
            let (_, response) = GetResponse::parse(&apdu).map_err(|_| ReadError::Decode)?;

            match response {
                GetResponse::Normal(normal) => {
                    return match normal.result {
                        GetDataResult::Data(data) => {
                            progress.data.extend_from_slice(&data);
                            Ok(())
                        }
                        GetDataResult::DataAccessError(result) => {
                            Err(ReadError::AccessDenied(result))
                        }
                    };
                }
                GetResponse::WithDataBlock(block) => {
                    match block.result {
                        GetDataResult::Data(data) => progress.data.extend_from_slice(&data),
                        GetDataResult::DataAccessError(result) => {
                            return Err(ReadError::AccessDenied(result));
                        }
                    }
                    if block.last_block {
                        return Ok(());
                    }
                    debug!("Requesting block after {}", block.block_number);
                    request = GetRequest::NextDataBlock(GetRequestNext {
                        invoke_id: block.invoke_id,
                        block_number: block.block_number,
                    });
                }
            }
        }
    }

    fn emit(&mut self, object: &ObjectDescriptor, data: &[u8]) {
        let mut printer = Printer::new();
        printer.start(&format!("Object=\"{}\"", object.name));
        let walked = decode_tags(data, |tag, length, content| printer.append(tag, length, content));
        if let Err(err) = walked {
            warn!("{}: {}", object.name, err);
        }
        printer.end();
        debug!("{}", printer.get());

        if let Err(err) = self.sink.write_object(&object.name, printer.get()) {
            error!("Cannot write {}: {}", object.name, err);
        }
    }
}
