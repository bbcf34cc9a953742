use crate::tile::{TileCoordinate, TileUid};
use crate::worker::DecodedTile;

/// Renderer-facing sink for decoded tile buffers.
///
/// Called at most once per load cycle and never for an aborted tile. The call
/// happens while the tile's record is locked, so implementations must not
/// call back into the [`Tile`](crate::tile::Tile) being installed.
pub trait TileInstaller: Send + Sync + 'static {
    fn install(&self, uid: TileUid, coordinate: TileCoordinate, data: DecodedTile);
}

impl<F> TileInstaller for F
where
    F: Fn(TileUid, TileCoordinate, DecodedTile) + Send + Sync + 'static,
{
    fn install(&self, uid: TileUid, coordinate: TileCoordinate, data: DecodedTile) {
        self(uid, coordinate, data)
    }
}

/// Drops decoded data.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardInstaller;

impl TileInstaller for DiscardInstaller {
    fn install(&self, _uid: TileUid, _coordinate: TileCoordinate, _data: DecodedTile) {}
}
