#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ChunkStatus {
    /// More items may follow.
    Full,
    /// The reader reported the end of its input while filling this chunk.
    Finished,
}

/// Items read during one commit cycle.
///
/// A chunk only lives between two commits and is owned by the step that
/// fills it. Its capacity bounds the number of successfully read items;
/// skipped records do not take a slot.
#[derive(Debug)]
pub struct Chunk<I> {
    items: Vec<I>,
    status: ChunkStatus,
    chunk_size: usize,
}

impl<I> Chunk<I> {
    pub fn new(chunk_size: usize) -> Chunk<I> {
        Chunk {
            items: Vec::with_capacity(chunk_size),
            status: ChunkStatus::Full,
            chunk_size,
        }
    }

    pub fn add_item(&mut self, item: I) {
        self.items.push(item);
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.chunk_size
    }

    pub fn mark_finished(&mut self) {
        self.status = ChunkStatus::Finished;
    }

    pub fn is_finished(&self) -> bool {
        self.status == ChunkStatus::Finished
    }

    pub fn get_items(&self) -> &[I] {
        &self.items
    }

    pub fn get_status(&self) -> ChunkStatus {
        self.status
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<I> {
        self.items
    }
}
