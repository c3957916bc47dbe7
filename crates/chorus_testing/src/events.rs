use nrelay::{kind, Event, NoteId, Pubkey};

pub fn pubkey(n: u8) -> Pubkey {
    Pubkey::new([n; 32])
}

pub fn note_id(n: u8) -> NoteId {
    NoteId::new([n; 32])
}

/// An event with id `[seed; 32]`. Signatures are never checked by the
/// client, so a placeholder is fine.
pub fn event(seed: u8, author: Pubkey, kind: u64, created_at: u64) -> Event {
    Event {
        id: note_id(seed),
        pubkey: author,
        created_at,
        kind,
        tags: vec![],
        content: String::new(),
        sig: "00".repeat(64),
        extra: Default::default(),
    }
}

pub fn text_note(seed: u8, author: Pubkey, created_at: u64, content: &str) -> Event {
    let mut ev = event(seed, author, kind::TEXT_NOTE, created_at);
    ev.content = content.to_owned();
    ev
}

/// A kind 0 event; `content` is the raw metadata JSON
pub fn metadata(seed: u8, author: Pubkey, created_at: u64, content: &str) -> Event {
    let mut ev = event(seed, author, kind::METADATA, created_at);
    ev.content = content.to_owned();
    ev
}

pub fn contact_list(seed: u8, author: Pubkey, created_at: u64, follows: &[Pubkey]) -> Event {
    let mut ev = event(seed, author, kind::CONTACT_LIST, created_at);
    ev.tags = follows
        .iter()
        .map(|pk| vec!["p".to_owned(), pk.hex()])
        .collect();
    ev
}
