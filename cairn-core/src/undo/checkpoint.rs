use cairn_types::{ActionSource, ProvenanceId};

use crate::action::CheckpointSpan;
use crate::layer::{Layer, Volume};

#[derive(Debug, Clone, PartialEq)]
enum CheckpointData {
    Full(Volume),
    Slices { first: usize, values: Vec<f32> },
}

/// Saved voxels of one layer together with the provenance id they carried.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerCheckpoint {
    dims: [usize; 3],
    provenance_id: ProvenanceId,
    data: CheckpointData,
}

impl LayerCheckpoint {
    pub fn capture(layer: &Layer, span: &CheckpointSpan) -> Result<Self, String> {
        let volume = layer.volume();
        let data = match span {
            CheckpointSpan::Full => CheckpointData::Full(volume.clone()),
            CheckpointSpan::Slices(range) => {
                if range.start >= range.end || range.end > volume.dims()[2] {
                    return Err(format!(
                        "slices {}..{} are outside the volume",
                        range.start, range.end
                    ));
                }
                let n = volume.slice_len();
                CheckpointData::Slices {
                    first: range.start,
                    values: volume.data()[range.start * n..range.end * n].to_vec(),
                }
            }
        };
        Ok(Self {
            dims: volume.dims(),
            provenance_id: layer.provenance_id(),
            data,
        })
    }

    pub fn span(&self) -> CheckpointSpan {
        match &self.data {
            CheckpointData::Full(_) => CheckpointSpan::Full,
            CheckpointData::Slices { first, values } => {
                let n = (self.dims[0] * self.dims[1]).max(1);
                CheckpointSpan::Slices(*first..*first + values.len() / n)
            }
        }
    }

    pub fn provenance_id(&self) -> ProvenanceId {
        self.provenance_id
    }

    /// Slice checkpoints only fit a volume of the same size.
    pub fn is_compatible(&self, layer: &Layer) -> bool {
        match self.data {
            CheckpointData::Full(_) => true,
            CheckpointData::Slices { .. } => layer.volume().dims() == self.dims,
        }
    }

    /// Write the saved voxels and provenance id back. Returns false, leaving
    /// the layer untouched, if the checkpoint no longer fits.
    pub fn apply(self, layer: &mut Layer) -> bool {
        if !self.is_compatible(layer) {
            return false;
        }
        match self.data {
            CheckpointData::Full(volume) => layer.set_volume(volume),
            CheckpointData::Slices { first, values } => {
                let n = layer.volume().slice_len();
                layer.volume_mut().data_mut()[first * n..first * n + values.len()]
                    .copy_from_slice(&values);
            }
        }
        if let Err(e) = layer
            .provenance_state()
            .set(self.provenance_id.get(), ActionSource::UndoBuffer)
        {
            log::warn!(target: "undo", "{}", e);
        }
        true
    }

    pub fn byte_size(&self) -> usize {
        match &self.data {
            CheckpointData::Full(volume) => volume.byte_size(),
            CheckpointData::Slices { values, .. } => values.len() * std::mem::size_of::<f32>(),
        }
    }
}
