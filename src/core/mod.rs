// Pure analysis stages. Nothing in here touches the file system; pixels,
// file names and sizes arrive from the collaborators in `services`.
pub mod duplicate;
pub mod enhancement;
pub mod hash;
pub mod image;
pub mod quality;
pub mod recommend;
pub mod record;
