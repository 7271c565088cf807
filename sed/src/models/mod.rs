pub mod discriminator;
pub mod modules;
