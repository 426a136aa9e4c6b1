pub mod backup;
pub mod compare;
pub mod duplicates;
pub mod restore;
pub mod snapshots;
pub mod verify;
