use rand::seq::SliceRandom;
use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};
use tracing::{debug, info};

use super::track::{LoopTag, NewTrack, Track, TrackId, TrackIdGenerator, TrackKey};
use crate::error::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    Single,
    Queue,
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopMode::Off => f.write_str("off"),
            LoopMode::Single => f.write_str("single"),
            LoopMode::Queue => f.write_str("queue"),
        }
    }
}

/// Cola de un servidor: pendientes en orden FIFO más el track actual
#[derive(Debug)]
pub struct GuildQueue {
    tracks: VecDeque<Track>,
    current: Option<Track>,
    loop_mode: LoopMode,
    ids: Arc<TrackIdGenerator>,
    max_size: usize,
}

impl GuildQueue {
    pub fn new(ids: Arc<TrackIdGenerator>, max_size: usize) -> Self {
        Self {
            tracks: VecDeque::new(),
            current: None,
            loop_mode: LoopMode::Off,
            ids,
            max_size,
        }
    }

    /// Agrega un track a la cola
    pub fn enqueue(&mut self, request: NewTrack) -> Result<TrackId, QueueError> {
        if self.is_full() {
            return Err(QueueError::Full { max: self.max_size });
        }

        let track = Track::new(self.ids.next_id(), request);
        let id = track.id;
        debug!("➕ Agregado a la cola: {} ({})", track.info.title, id);
        self.tracks.push_back(track);
        Ok(id)
    }

    /// Agrega múltiples tracks (playlist), truncando al espacio disponible
    pub fn enqueue_many(&mut self, requests: Vec<NewTrack>) -> Vec<TrackId> {
        let available_space = self.max_size.saturating_sub(self.tracks.len());
        let ids: Vec<TrackId> = requests
            .into_iter()
            .take(available_space)
            .map(|request| {
                let track = Track::new(self.ids.next_id(), request);
                let id = track.id;
                self.tracks.push_back(track);
                id
            })
            .collect();

        info!("➕ Agregadas {} canciones a la cola", ids.len());
        ids
    }

    pub fn tracks(&self) -> &VecDeque<Track> {
        &self.tracks
    }

    pub(crate) fn tracks_mut(&mut self) -> &mut VecDeque<Track> {
        &mut self.tracks
    }

    pub fn head(&self) -> Option<&Track> {
        self.tracks.front()
    }

    pub fn head_key(&self) -> Option<TrackKey> {
        self.tracks.front().map(Track::key)
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub(crate) fn set_current(&mut self, track: Option<Track>) {
        self.current = track;
    }

    pub(crate) fn pop_front(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub(crate) fn set_loop_mode_raw(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    pub(crate) fn next_id(&self) -> TrackId {
        self.ids.next_id()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tracks.len() >= self.max_size
    }

    pub(crate) fn find_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|track| track.id == id)
    }

    /// Elimina un track específico
    pub fn remove(&mut self, index: usize) -> Result<Track, QueueError> {
        let len = self.tracks.len();
        let track = self
            .tracks
            .remove(index)
            .ok_or(QueueError::IndexOutOfRange { index, len })?;
        debug!("❌ Track eliminado en posición {}", index);
        Ok(track)
    }

    /// Mueve un track a una nueva posición
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), QueueError> {
        let len = self.tracks.len();
        for index in [from, to] {
            if index >= len {
                return Err(QueueError::IndexOutOfRange { index, len });
            }
        }

        if from != to {
            if let Some(track) = self.tracks.remove(from) {
                self.tracks.insert(to, track);
                debug!("📍 Track movido de posición {} a {}", from, to);
            }
        }
        Ok(())
    }

    /// Mezcla la cola; el clon de loop single sigue al frente
    pub fn shuffle(&mut self) {
        let pinned = match self.tracks.front() {
            Some(track) if track.loop_tag == Some(LoopTag::Single) => self.tracks.pop_front(),
            _ => None,
        };

        let mut items: Vec<_> = self.tracks.drain(..).collect();
        items.shuffle(&mut rand::thread_rng());
        self.tracks.extend(items);

        if let Some(track) = pinned {
            self.tracks.push_front(track);
        }
        info!("🔀 Cola mezclada");
    }

    /// Vacía los pendientes; el track actual sigue sonando
    pub fn clear(&mut self) -> usize {
        let removed = self.tracks.len();
        self.tracks.clear();
        info!("🗑️ Cola limpiada ({} tracks)", removed);
        removed
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.clone(),
            tracks: self.tracks.iter().cloned().collect(),
            loop_mode: self.loop_mode,
            total_duration: self.total_duration(),
        }
    }

    fn total_duration(&self) -> Duration {
        self.current
            .iter()
            .chain(self.tracks.iter())
            .filter_map(|track| track.info.duration)
            .sum()
    }
}

/// Copia inmutable de la cola para la UI
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub tracks: Vec<Track>,
    pub loop_mode: LoopMode,
    pub total_duration: Duration,
}

impl QueueSnapshot {
    /// Obtiene una página (1-based)
    pub fn page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let total_items = self.tracks.len();
        let total_pages = total_items.div_ceil(items_per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;
        let end = (start + items_per_page).min(total_items);

        QueuePage {
            items: self.tracks.get(start..end).map(<[Track]>::to_vec).unwrap_or_default(),
            current_page,
            total_pages,
            total_items,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<Track>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{new_track, queue_with};
    use pretty_assertions::assert_eq;

    fn titles(queue: &GuildQueue) -> Vec<String> {
        queue.tracks().iter().map(|t| t.info.title.clone()).collect()
    }

    #[test]
    fn enqueue_respects_max_size() {
        let mut queue = GuildQueue::new(Arc::new(TrackIdGenerator::new()), 2);
        queue.enqueue(new_track("a")).unwrap();
        queue.enqueue(new_track("b")).unwrap();
        assert!(matches!(queue.enqueue(new_track("c")), Err(QueueError::Full { max: 2 })));
    }

    #[test]
    fn enqueue_many_truncates_to_free_space() {
        let mut queue = GuildQueue::new(Arc::new(TrackIdGenerator::new()), 3);
        queue.enqueue(new_track("a")).unwrap();
        let ids = queue.enqueue_many(vec![new_track("b"), new_track("c"), new_track("d")]);
        assert_eq!(ids.len(), 2);
        assert_eq!(titles(&queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn ids_are_unique_across_queues_sharing_a_generator() {
        let ids = Arc::new(TrackIdGenerator::new());
        let mut first = GuildQueue::new(ids.clone(), 10);
        let mut second = GuildQueue::new(ids, 10);
        let a = first.enqueue(new_track("a")).unwrap();
        let b = second.enqueue(new_track("b")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn move_and_remove_check_bounds() {
        let mut queue = queue_with(&["a", "b", "c"]);
        queue.move_track(2, 0).unwrap();
        assert_eq!(titles(&queue), vec!["c", "a", "b"]);

        assert!(matches!(
            queue.move_track(0, 3),
            Err(QueueError::IndexOutOfRange { index: 3, len: 3 })
        ));
        assert_eq!(queue.remove(1).unwrap().info.title, "a");
        assert!(queue.remove(5).is_err());
    }

    #[test]
    fn shuffle_keeps_the_single_clone_in_front() {
        let mut queue = queue_with(&["a", "b", "c", "d", "e"]);
        let current = queue.pop_front();
        queue.set_current(current);
        crate::audio::loop_mode::set_mode(&mut queue, LoopMode::Single);

        for _ in 0..10 {
            queue.shuffle();
            assert_eq!(queue.head().and_then(|t| t.loop_tag), Some(LoopTag::Single));
            assert_eq!(queue.len(), 5);
        }
    }

    #[test]
    fn snapshot_pages() {
        let queue = queue_with(&["a", "b", "c", "d", "e"]);
        let snapshot = queue.snapshot();

        let page = snapshot.page(2, 2);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.iter().map(|t| t.info.title.as_str()).collect::<Vec<_>>(), vec!["c", "d"]);

        // Páginas fuera de rango se ajustan a la última
        assert_eq!(snapshot.page(9, 2).current_page, 3);
        assert_eq!(snapshot.page(0, 2).current_page, 1);
    }
}
