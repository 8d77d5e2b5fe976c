//! Loop modes expressed as synthetic clones inside the queue.
//!
//! `single` keeps one clone of the current track at the head, `queue`
//! re-appends the finished track at the tail. Clones carry a [`LoopTag`] and
//! the identity of the original track, so switching modes can always remove
//! exactly what a previous mode inserted.

use tracing::{debug, info};

use super::{
    queue::{GuildQueue, LoopMode},
    track::LoopTag,
};

/// Cambia el modo de loop y poda los clones que ya no corresponden
pub fn set_mode(queue: &mut GuildQueue, mode: LoopMode) {
    queue.set_loop_mode_raw(mode);
    match mode {
        LoopMode::Off => {
            strip(queue, |_| true);
            info!("➡️ Repetición desactivada");
        }
        LoopMode::Single => {
            strip(queue, |tag| tag == LoopTag::Queue);
            sync_single_clone(queue);
            info!("🔂 Repetir canción activado");
        }
        LoopMode::Queue => {
            strip(queue, |tag| tag == LoopTag::Single);
            info!("🔁 Repetir cola activado");
        }
    }
}

/// Se ejecuta una vez por avance, antes de sacar el siguiente track
pub fn prepare_for_next_track(queue: &mut GuildQueue) {
    match queue.loop_mode() {
        LoopMode::Off => strip(queue, |_| true),
        LoopMode::Single => {
            strip(queue, |tag| tag == LoopTag::Queue);
            sync_single_clone(queue);
        }
        LoopMode::Queue => {
            strip(queue, |tag| tag == LoopTag::Single);
            let Some(current) = queue.current() else {
                return;
            };
            let source = current.source_key();
            let clone = current.loop_clone(queue.next_id(), LoopTag::Queue);

            queue
                .tracks_mut()
                .retain(|track| !(track.loop_tag == Some(LoopTag::Queue) && track.source_key() == source));
            // El loop nunca empuja la cola por encima de su límite
            if queue.is_full() {
                debug!("🔁 Cola llena: {} no vuelve al final", source);
                return;
            }
            debug!("🔁 {} vuelve al final de la cola como {}", source, clone.id);
            queue.tracks_mut().push_back(clone);
        }
    }
}

fn strip(queue: &mut GuildQueue, matches: impl Fn(LoopTag) -> bool) {
    queue
        .tracks_mut()
        .retain(|track| !track.loop_tag.is_some_and(&matches));
}

/// Exactamente un clon single del track actual, en la posición 0
fn sync_single_clone(queue: &mut GuildQueue) {
    let Some(current) = queue.current() else {
        strip(queue, |tag| tag == LoopTag::Single);
        return;
    };
    let source = current.source_key();

    let front_is_synced = queue
        .head()
        .is_some_and(|head| head.loop_tag == Some(LoopTag::Single) && head.source_key() == source);

    if front_is_synced {
        // Conservar el clon del frente y descartar cualquier otro
        let tracks = queue.tracks_mut();
        let mut index = 0;
        tracks.retain(|track| {
            index += 1;
            index == 1 || track.loop_tag != Some(LoopTag::Single)
        });
        return;
    }

    let clone = current.loop_clone(queue.next_id(), LoopTag::Single);
    strip(queue, |tag| tag == LoopTag::Single);
    queue.tracks_mut().push_front(clone);
}
