//! Music catalog schema and seed data shared by the unit tests.

use crate::models::{Record, RecordRef};
use crate::reflect::{FieldDescriptor, ModelSchema, Registry, RelationDescriptor};
use crate::store::{MemoryStore, Store};

pub fn music() -> Registry {
    Registry::new()
        .register(
            ModelSchema::new("Artist")
                .field(FieldDescriptor::text("name").max_length(100))
                .relation(RelationDescriptor::one_to_many("album_set", "Album", "artist"))
                .relation(RelationDescriptor::one_to_many("song_set", "Song", "artist"))
                .relation(RelationDescriptor::one_to_one("passport", "Passport", "owner"))
                .relation(RelationDescriptor::one_to_many(
                    "instrument_set",
                    "Instrument",
                    "owner",
                ))
                .relation(RelationDescriptor::many_to_many("group_set", "Group", "members"))
                .relation(RelationDescriptor::one_to_many(
                    "membership_set",
                    "Membership",
                    "person",
                )),
        )
        .register(
            ModelSchema::new("Album")
                .field(FieldDescriptor::text("title").max_length(100))
                .field(FieldDescriptor::int("year").nullable().default_value(0))
                .field(FieldDescriptor::reference("artist", "Artist"))
                .relation(RelationDescriptor::many_to_one("artist", "Artist"))
                .relation(RelationDescriptor::one_to_many("song_set", "Song", "album")),
        )
        .register(
            ModelSchema::new("Song")
                .field(FieldDescriptor::text("title").max_length(100))
                .field(FieldDescriptor::reference("album", "Album").nullable())
                .field(FieldDescriptor::reference("artist", "Artist"))
                .relation(RelationDescriptor::many_to_one("album", "Album"))
                .relation(RelationDescriptor::many_to_one("artist", "Artist"))
                .relation(RelationDescriptor::many_to_many(
                    "compilation_set",
                    "Compilation",
                    "songs",
                )),
        )
        .register(
            ModelSchema::new("Compilation")
                .field(FieldDescriptor::text("title"))
                .relation(RelationDescriptor::many_to_many("songs", "Song", "compilation_set")),
        )
        .register(
            ModelSchema::new("Instrument")
                .field(FieldDescriptor::text("name"))
                .field(FieldDescriptor::text("serial_number").unique().nullable())
                .field(FieldDescriptor::reference("owner", "Artist").nullable())
                .relation(RelationDescriptor::many_to_one("owner", "Artist")),
        )
        .register(
            ModelSchema::new("Passport")
                .field(FieldDescriptor::text("number").unique())
                .field(FieldDescriptor::reference("owner", "Artist"))
                .relation(RelationDescriptor::one_to_one("owner", "Artist", "passport")),
        )
        .register(
            ModelSchema::new("Group")
                .field(FieldDescriptor::text("name"))
                .relation(RelationDescriptor::many_to_many("members", "Artist", "group_set"))
                .relation(RelationDescriptor::one_to_many(
                    "membership_set",
                    "Membership",
                    "group",
                )),
        )
        .register(
            ModelSchema::new("Membership")
                .field(FieldDescriptor::reference("person", "Artist"))
                .field(FieldDescriptor::reference("group", "Group"))
                .field(FieldDescriptor::text("invite_reason").blank())
                .field(FieldDescriptor::text("date_joined").nullable())
                .relation(RelationDescriptor::many_to_one("person", "Artist"))
                .relation(RelationDescriptor::many_to_one("group", "Group")),
        )
}

/// One artist (pk 1) with one album (pk 2).
pub fn seeded_memory() -> (MemoryStore, RecordRef, RecordRef) {
    let mut store = MemoryStore::new();
    let artist = put(&mut store, Record::new("Artist").with("name", "Les"));
    let album = put(
        &mut store,
        Record::new("Album")
            .with("title", "Frizzle Fry")
            .with("artist", &artist),
    );
    (store, artist, album)
}

pub fn put(store: &mut dyn Store, record: Record) -> RecordRef {
    let handle = RecordRef::new(record);
    store.save(&handle).unwrap();
    handle
}

/// A small, fully wired catalog.
pub struct Catalog {
    pub les: RecordRef,
    pub frizzle: RecordRef,
    pub sailing: RecordRef,
    /// Two songs on `frizzle`, one on `sailing`.
    pub songs: Vec<RecordRef>,
    pub best_of: RecordRef,
    pub passport: RecordRef,
    pub bass: RecordRef,
    pub primus: RecordRef,
    pub membership: RecordRef,
}

pub fn catalog(store: &mut dyn Store) -> Catalog {
    let les = put(store, Record::new("Artist").with("name", "Les"));
    let frizzle = put(
        store,
        Record::new("Album")
            .with("title", "Frizzle Fry")
            .with("year", 1990)
            .with("artist", &les),
    );
    let sailing = put(
        store,
        Record::new("Album")
            .with("title", "Sailing the Seas of Cheese")
            .with("year", 1991)
            .with("artist", &les),
    );
    let songs: Vec<RecordRef> = [
        ("To Defy", &frizzle),
        ("John the Fisherman", &frizzle),
        ("Jerry Was a Race Car Driver", &sailing),
    ]
    .into_iter()
    .map(|(title, album)| {
        put(
            store,
            Record::new("Song")
                .with("title", title)
                .with("album", album)
                .with("artist", &les),
        )
    })
    .collect();

    let best_of = put(store, Record::new("Compilation").with("title", "Best of"));
    let songs_rel = RelationDescriptor::many_to_many("songs", "Song", "compilation_set");
    store
        .associate(&best_of, &songs_rel, &[songs[0].clone(), songs[2].clone()])
        .unwrap();

    let passport = put(
        store,
        Record::new("Passport")
            .with("number", "P-1")
            .with("owner", &les),
    );
    let bass = put(
        store,
        Record::new("Instrument")
            .with("name", "Bass")
            .with("serial_number", "X")
            .with("owner", &les),
    );

    let primus = put(store, Record::new("Group").with("name", "Primus"));
    let members = RelationDescriptor::many_to_many("members", "Artist", "group_set");
    store.associate(&primus, &members, &[les.clone()]).unwrap();
    let membership = put(
        store,
        Record::new("Membership")
            .with("person", &les)
            .with("group", &primus)
            .with("invite_reason", "needs a bass player")
            .with("date_joined", "1989-01-01"),
    );

    Catalog {
        les,
        frizzle,
        sailing,
        songs,
        best_of,
        passport,
        bass,
        primus,
        membership,
    }
}
