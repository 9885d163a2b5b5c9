use bytes::Bytes;

/// Split `audio` into consecutive slices of at most `max_chunk` bytes.
pub fn chunk_audio(audio: &Bytes, max_chunk: usize) -> Vec<Bytes> {
    let max_chunk = max_chunk.max(1);
    (0..audio.len())
        .step_by(max_chunk)
        .map(|start| audio.slice(start..(start + max_chunk).min(audio.len())))
        .collect()
}
