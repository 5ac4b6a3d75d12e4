use crate::store::ArtifactKind;

/// Default cumulative upload ceiling in bytes. Sized for the largest
/// plausible sun-time table with headroom, small enough to keep a bounded
/// footprint on the target board.
pub const DEFAULT_UPLOAD_CEILING: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("upload exceeds the {limit}-byte ceiling")]
    TooLarge { limit: usize },
    #[error("an upload of the {0} is already in progress")]
    SessionBusy(ArtifactKind),
}

/// Accumulates one upload's chunks without requiring a declared total size.
/// Exclusively owns its buffer until finished or abandoned.
#[derive(Debug)]
pub struct UploadSession {
    kind: ArtifactKind,
    ceiling: usize,
    buf: Vec<u8>,
}

impl UploadSession {
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn received(&self) -> usize {
        self.buf.len()
    }

    /// Appends one chunk, rejecting before the allocation that would cross
    /// the ceiling.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        if self.buf.len() + chunk.len() > self.ceiling {
            return Err(UploadError::TooLarge {
                limit: self.ceiling,
            });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }
}

/// Hands out at most one `UploadSession` per artifact kind. Finishing or
/// abandoning a session frees its slot; abandonment discards the buffer
/// without staging anything.
#[derive(Debug)]
pub struct UploadReceiver {
    ceiling: usize,
    open: [bool; 2],
}

fn slot(kind: ArtifactKind) -> usize {
    match kind {
        ArtifactKind::Config => 0,
        ArtifactKind::SunTimes => 1,
    }
}

impl UploadReceiver {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            open: [false; 2],
        }
    }

    pub fn begin(&mut self, kind: ArtifactKind) -> Result<UploadSession, UploadError> {
        if self.open[slot(kind)] {
            return Err(UploadError::SessionBusy(kind));
        }
        self.open[slot(kind)] = true;
        Ok(UploadSession {
            kind,
            ceiling: self.ceiling,
            buf: Vec::new(),
        })
    }

    /// Closes the session and hands back the assembled buffer for staging.
    pub fn finish(&mut self, session: UploadSession) -> Vec<u8> {
        self.open[slot(session.kind)] = false;
        session.buf
    }

    pub fn abandon(&mut self, session: UploadSession) {
        self.open[slot(session.kind)] = false;
    }
}

impl Default for UploadReceiver {
    fn default() -> Self {
        Self::new(DEFAULT_UPLOAD_CEILING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn assembles_chunks_in_order() {
        let mut receiver = UploadReceiver::new(64);
        let mut session = receiver.begin(ArtifactKind::Config).unwrap();
        session.append(b"{\"version\":").unwrap();
        session.append(b" \"1.0.0\"}").unwrap();
        assert_eq!(session.received(), 21);
        assert_eq!(receiver.finish(session), b"{\"version\": \"1.0.0\"}".to_vec());
    }

    #[test]
    fn fails_on_the_chunk_that_crosses_the_ceiling() {
        let mut receiver = UploadReceiver::new(10);
        let mut session = receiver.begin(ArtifactKind::Config).unwrap();
        session.append(b"12345").unwrap();
        session.append(b"12345").unwrap(); // exactly at the ceiling
        let err = session.append(b"x").unwrap_err();
        assert_eq!(err, UploadError::TooLarge { limit: 10 });
        // The buffer never grew past the ceiling.
        assert_eq!(session.received(), 10);
    }

    #[test]
    fn one_session_per_artifact_kind() {
        let mut receiver = UploadReceiver::new(64);
        let config_session = receiver.begin(ArtifactKind::Config).unwrap();
        assert_eq!(
            receiver.begin(ArtifactKind::Config).unwrap_err(),
            UploadError::SessionBusy(ArtifactKind::Config)
        );

        // Different artifact kinds don't contend.
        let sun_session = receiver.begin(ArtifactKind::SunTimes).unwrap();

        receiver.abandon(config_session);
        receiver.finish(sun_session);
        assert!(receiver.begin(ArtifactKind::Config).is_ok());
        assert!(receiver.begin(ArtifactKind::SunTimes).is_ok());
    }
}
