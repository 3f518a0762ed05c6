pub mod memory;
pub mod personas;
pub mod preferences;

pub fn all() -> Vec<poise::Command<crate::Data, crate::Error>> {
    vec![
        preferences::preferences(),
        personas::persona(),
        memory::memory(),
    ]
}
