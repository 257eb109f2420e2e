use crate::peer::engine::RemoteMediaTrack;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct Entry<R> {
    track: Arc<R>,
    stopped: bool,
}

/// Живые входящие треки одной сессии по id трека
pub struct RemoteTrackSet<R> {
    tracks: Mutex<HashMap<String, Entry<R>>>,
}

impl<R> Default for RemoteTrackSet<R> {
    fn default() -> Self {
        Self {
            tracks: Mutex::new(HashMap::new()),
        }
    }
}

impl<R: RemoteMediaTrack> RemoteTrackSet<R> {
    /// false, если трек с таким id уже есть
    pub fn insert(&self, track: Arc<R>) -> bool {
        let mut tracks = self.tracks.lock();
        let id = track.id();
        if tracks.contains_key(&id) {
            return false;
        }
        tracks.insert(
            id,
            Entry {
                track,
                stopped: false,
            },
        );
        true
    }

    pub fn remove(&self, id: &str) -> Option<Arc<R>> {
        self.tracks.lock().remove(id).map(|e| e.track)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tracks.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tracks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<R>> {
        self.tracks.lock().values().map(|e| e.track.clone()).collect()
    }

    /// Помечает трек остановленным и отдаёт его, если он ещё работал
    pub fn take_for_stop(&self, id: &str) -> Option<Arc<R>> {
        let mut tracks = self.tracks.lock();
        let entry = tracks.get_mut(id)?;
        if entry.stopped {
            return None;
        }
        entry.stopped = true;
        Some(entry.track.clone())
    }

    /// Очищает набор и возвращает ещё не остановленные треки
    pub fn drain_unstopped(&self) -> Vec<Arc<R>> {
        self.tracks
            .lock()
            .drain()
            .filter(|(_, e)| !e.stopped)
            .map(|(_, e)| e.track)
            .collect()
    }
}
