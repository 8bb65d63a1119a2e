//! Log collection: funnels report fragments from all stages into one
//! well-formed XML document.
//!
//! Every stage holds a cloned [`ReportSink`] and fires fragments at it
//! without waiting (fire-and-forget signaling). The [`LogCollector`]
//! task is the only writer to the output stream, so no locking is
//! needed around the document itself. The document's closing tag is
//! written exactly once, on the shutdown signal; a crash mid-run
//! leaves the document unterminated, which is an accepted limitation.

use std::io::Write;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::watchdog::Liveness;
use crate::xml;

/// One XML-formatted event record produced by a stage.
#[derive(Debug, Clone)]
pub struct ReportFragment {
    /// Name of the stage that produced the fragment.
    pub source: String,
    /// Well-formed XML describing the event.
    pub xml: String,
}

#[derive(Debug)]
enum CollectorMessage {
    Fragment(ReportFragment),
    Close,
}

/// Cloneable handle for delivering report fragments to the collector.
#[derive(Debug, Clone)]
pub struct ReportSink {
    tx: mpsc::UnboundedSender<CollectorMessage>,
}

impl ReportSink {
    /// Delivers one fragment. Never blocks; fragments arriving after
    /// the collector closed are silently dropped.
    pub fn report(&self, source: &str, fragment: impl Into<String>) {
        let message = CollectorMessage::Fragment(ReportFragment {
            source: source.to_string(),
            xml: fragment.into(),
        });
        if self.tx.send(message).is_err() {
            debug!(source, "report fragment dropped after collector close");
        }
    }

    /// Requests the final flush-and-close of the log document.
    pub fn close(&self) {
        let _ = self.tx.send(CollectorMessage::Close);
    }
}

impl Liveness for ReportSink {
    /// The collector never has outstanding asynchronous work of its
    /// own: each received fragment is written synchronously.
    fn is_alive(&self) -> bool {
        false
    }
}

/// Collects log messages from all stages and stores them in an output
/// stream as a single XML document.
pub struct LogCollector<W: Write> {
    output: W,
    rx: mpsc::UnboundedReceiver<CollectorMessage>,
}

impl<W: Write> LogCollector<W> {
    /// Creates a collector writing to `output` and returns it together
    /// with the sink handle the stages report through.
    ///
    /// The XML header and root element open tag are written
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the header cannot be
    /// written.
    pub fn new(mut output: W) -> std::io::Result<(Self, ReportSink)> {
        writeln!(output, "<?xml version=\"1.0\" encoding=\"UTF-8\" ?>")?;
        writeln!(output, "<log isodate=\"{}\">", xml::iso_now())?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok((Self { output, rx }, ReportSink { tx }))
    }

    /// Consumes fragments until the close signal (or until every sink
    /// is dropped), then writes the closing tag and flushes.
    ///
    /// Write failures are logged and swallowed: the log is the
    /// pipeline's output, but a broken log stream must not take the
    /// run down with it.
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            match message {
                CollectorMessage::Fragment(fragment) => self.write_fragment(&fragment),
                CollectorMessage::Close => break,
            }
        }
        self.write_footer();
    }

    fn write_fragment(&mut self, fragment: &ReportFragment) {
        let now = Utc::now();
        let result = write!(
            self.output,
            "<logitem epoch=\"{}\" source=\"{}\" time=\"{}\">\n{}{}</logitem>\n",
            now.timestamp(),
            xml::escape(&fragment.source),
            xml::iso_timestamp(now),
            fragment.xml,
            if fragment.xml.ends_with('\n') { "" } else { "\n" },
        );
        if let Err(error) = result {
            warn!(%error, source = %fragment.source, "failed to write log item");
        }
    }

    fn write_footer(&mut self) {
        if let Err(error) = writeln!(self.output, "</log>\n<!-- {} -->", xml::iso_now()) {
            warn!(%error, "failed to write log footer");
        }
        if let Err(error) = self.output.flush() {
            warn!(%error, "failed to flush log output");
        }
    }
}
