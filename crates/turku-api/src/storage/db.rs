//! SQLite database handle for the Turku registry.

turku_core::define_database!(TurkuDatabase, "Turku database migrations complete");
