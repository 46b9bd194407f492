//! JSON-lines renderer output
//!
//! One record per line, consumed by an external drawing process:
//!
//! ```text
//! {"type":"erase"}
//! {"type":"terrain","room":"E1N1","terrain":"1111...0"}
//! {"type":"state","tickDuration":1.0,"state":{"room":"E1N1","gameTime":12,...}}
//! ```

use std::io::Write;

use serde::Serialize;
use tracing::warn;

use crate::core::io_traits::{RenderError, Renderer};
use crate::core::publisher::RenderState;
use crate::core::room::RoomName;
use crate::core::terrain::{Terrain, TerrainKind};

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Record<'a> {
    Erase,
    Terrain {
        room: &'a RoomName,
        terrain: String,
    },
    State {
        #[serde(rename = "tickDuration")]
        tick_duration: f32,
        state: &'a RenderState,
    },
}

/// Terrain re-encoded as one digit per cell, row-major
fn encode_terrain(terrain: &Terrain) -> String {
    terrain
        .cells()
        .map(|cell| match cell.kind {
            TerrainKind::Plain => '0',
            TerrainKind::Wall => '1',
            TerrainKind::Swamp => '2',
        })
        .collect()
}

pub struct JsonLinesRenderer<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn emit(&mut self, record: &Record<'_>) -> Result<(), RenderError> {
        let line = serde_json::to_string(record).map_err(|e| RenderError::Rejected(e.to_string()))?;
        writeln!(self.out, "{}", line).map_err(|e| RenderError::Output(e.to_string()))?;
        self.out.flush().map_err(|e| RenderError::Output(e.to_string()))
    }
}

impl<W: Write> Renderer for JsonLinesRenderer<W> {
    fn set_terrain(&mut self, terrain: &Terrain) -> Result<(), RenderError> {
        self.emit(&Record::Terrain {
            room: terrain.room(),
            terrain: encode_terrain(terrain),
        })
    }

    fn apply_state(&mut self, state: &RenderState, tick_duration: f32) -> Result<(), RenderError> {
        self.emit(&Record::State { tick_duration, state })
    }

    fn erase(&mut self) {
        if let Err(e) = self.emit(&Record::Erase) {
            warn!(error = %e, "[RENDER] Erase not written");
        }
    }
}
