use std::sync::Arc;
use std::time::SystemTime;

use crate::error::DecodeError;
use crate::tile::ExpiryData;

use super::job::{DecodeRequest, DecodedTile};

/// Parser run on a worker for every decode job.
///
/// Decoding is CPU-bound and executes on the blocking pool, so
/// implementations may take their time but must not block on I/O owned by
/// the coordinator.
pub trait TileDecoder: Send + Sync + 'static {
    fn decode(&self, request: &DecodeRequest) -> Result<DecodedTile, DecodeError>;
}

impl<F> TileDecoder for F
where
    F: Fn(&DecodeRequest) -> Result<DecodedTile, DecodeError> + Send + Sync + 'static,
{
    fn decode(&self, request: &DecodeRequest) -> Result<DecodedTile, DecodeError> {
        self(request)
    }
}

/// Hands the payload through as a single buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughDecoder;

impl TileDecoder for PassthroughDecoder {
    fn decode(&self, request: &DecodeRequest) -> Result<DecodedTile, DecodeError> {
        if request.data.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(DecodedTile::new(vec![request.data.clone()]))
    }
}

/// Wraps a decoder and stamps each decoded tile with the expiry a
/// `Cache-Control` policy (e.g. `"max-age=300"`) yields at decode time.
///
/// Expiry the inner decoder already reported is left alone.
#[derive(Debug, Clone)]
pub struct CachePolicyDecoder<T> {
    inner: T,
    cache_control: Arc<str>,
}

impl<T: TileDecoder> CachePolicyDecoder<T> {
    pub fn new(inner: T, cache_control: impl Into<Arc<str>>) -> Self {
        Self {
            inner,
            cache_control: cache_control.into(),
        }
    }
}

impl<T: TileDecoder> TileDecoder for CachePolicyDecoder<T> {
    fn decode(&self, request: &DecodeRequest) -> Result<DecodedTile, DecodeError> {
        let decoded = self.inner.decode(request)?;
        if decoded.expiry.is_some() {
            return Ok(decoded);
        }
        let expiry =
            ExpiryData::from_cache_control(Some(&self.cache_control), None, SystemTime::now());
        Ok(decoded.with_expiry(expiry))
    }
}
