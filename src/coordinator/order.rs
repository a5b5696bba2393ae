use rand::seq::SliceRandom;
use tracing::info;

/// Walk order over the cached track list. Reshuffled at the end of each playthrough.
#[derive(Debug, Clone, Default)]
pub struct PlayOrder {
    indices: Vec<usize>,
    cursor: usize,
}

impl PlayOrder {
    pub fn new(len: usize, shuffle: bool) -> Self {
        let mut indices: Vec<usize> = (0..len).collect();
        if shuffle {
            indices.shuffle(&mut rand::thread_rng());
        }
        Self { indices, cursor: 0 }
    }

    /// Same as `new`, but `first` is played before anything else.
    pub fn starting_at(len: usize, shuffle: bool, first: usize) -> Self {
        let mut order = Self::new(len, shuffle);
        if let Some(pos) = order.indices.iter().position(|&i| i == first) {
            order.indices.swap(0, pos);
        }
        order
    }

    /// Index into the track list of the track to play now.
    pub fn current(&self) -> Option<usize> {
        self.indices.get(self.cursor).copied()
    }

    pub fn advance(&mut self, shuffle: bool) {
        if self.indices.is_empty() {
            return;
        }

        self.cursor += 1;
        if self.cursor >= self.indices.len() {
            info!("Playlist complete ({} tracks), starting over", self.indices.len());
            if shuffle {
                self.indices.shuffle(&mut rand::thread_rng());
            }
            self.cursor = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
