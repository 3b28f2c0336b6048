use pcap::{Activated, Capture};
use crate::extract::extract::LinkType;
use crate::worker::worker::Frame;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError{
    #[error("cannot open interface {interface}: {source}")]
    OpenDevice{ interface: String, source: pcap::Error },

    #[error("cannot open capture file {path}: {source}")]
    OpenFile{ path: String, source: pcap::Error },

    #[error("invalid capture filter {filter:?}: {source}")]
    Filter{ filter: String, source: pcap::Error },

    #[error("unsupported datalink type {0}")]
    UnsupportedDatalink(i32),

    #[error("capture on {name} failed: {source}")]
    Read{ name: String, source: pcap::Error },
}

#[derive(Debug, PartialEq, Eq)]
enum ReadStep{
    Retry,
    Finished,
}

/// Timeouts are retried and end of savefile finishes the capture; anything
/// else is a failed capture.
fn on_read_error(name: &str, err: pcap::Error) -> Result<ReadStep, CaptureError>{
    match err{
        pcap::Error::TimeoutExpired => Ok(ReadStep::Retry),
        pcap::Error::NoMorePackets => Ok(ReadStep::Finished),
        source => Err(CaptureError::Read{ name: name.to_string(), source }),
    }
}

#[derive(Clone, Debug)]
pub struct CaptureConfig{
    pub interface: String,
    pub snaplen: i32,
    pub promisc: bool,
    pub read_timeout_ms: i32,
    pub filter: Option<String>,
    pub read_file: Option<String>,
}

/// An opened capture handle, either a live interface or a savefile replay.
pub struct CaptureSource{
    name: String,
    capture: Capture<dyn Activated>,
    link: LinkType,
}

impl CaptureSource{
    pub fn open(config: &CaptureConfig) -> Result<CaptureSource, CaptureError>{
        let (name, mut capture): (String, Capture<dyn Activated>) = match &config.read_file{
            Some(path) => {
                let capture = Capture::from_file(path)
                    .map_err(|source| CaptureError::OpenFile{ path: path.clone(), source })?;
                (path.clone(), capture.into())
            },
            None => {
                let capture = Capture::from_device(config.interface.as_str())
                    .and_then(|c| c
                        .promisc(config.promisc)
                        .snaplen(config.snaplen)
                        .timeout(config.read_timeout_ms)
                        .open())
                    .map_err(|source| CaptureError::OpenDevice{ interface: config.interface.clone(), source })?;
                (config.interface.clone(), capture.into())
            },
        };
        if let Some(filter) = &config.filter{
            capture.filter(filter, true)
                .map_err(|source| CaptureError::Filter{ filter: filter.clone(), source })?;
        }
        let datalink = capture.get_datalink().0;
        let link = LinkType::from_datalink(datalink).ok_or(CaptureError::UnsupportedDatalink(datalink))?;
        log::info!("capturing on {} (datalink {:?}, snaplen {}, promisc {})", name, link, config.snaplen, config.promisc);
        Ok(CaptureSource{ name, capture, link })
    }

    pub fn link_type(&self) -> LinkType{
        self.link
    }

    /// Blocking read loop. Returns when the savefile ends, the frame queue
    /// is closed, or pcap reports an unrecoverable error. Dropping `frames`
    /// on return closes the shared stream for the workers.
    pub fn run(mut self, frames: kanal::Sender<Frame>) -> Result<(), CaptureError>{
        let mut captured: u64 = 0;
        let result = loop{
            match self.capture.next_packet(){
                Ok(packet) => {
                    captured += 1;
                    if frames.send(packet.data.to_vec()).is_err(){
                        log::warn!("frame queue closed, stopping capture on {}", self.name);
                        break Ok(());
                    }
                },
                Err(e) => match on_read_error(&self.name, e){
                    Ok(ReadStep::Retry) => continue,
                    Ok(ReadStep::Finished) => {
                        log::info!("end of capture {} after {} frames", self.name, captured);
                        break Ok(());
                    },
                    Err(e) => {
                        log::error!("{}", e);
                        break Err(e);
                    },
                },
            }
        };
        if let Ok(stats) = self.capture.stats(){
            log::info!("capture {}: received {}, dropped {}, if_dropped {}", self.name, stats.received, stats.dropped, stats.if_dropped);
        }
        result
    }
}
