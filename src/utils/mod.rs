// src/utils/mod.rs

pub mod academic;
pub mod hash;
pub mod html;
pub mod jwt;
pub mod token;
