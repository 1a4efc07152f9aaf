pub use sea_orm_migration::prelude::*;

mod m20260214_120000_add_campaign_tables;
mod m20260215_093000_add_send_tracking;
mod m20260302_110000_add_campaign_preheader;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260214_120000_add_campaign_tables::Migration),
            Box::new(m20260215_093000_add_send_tracking::Migration),
            Box::new(m20260302_110000_add_campaign_preheader::Migration),
        ]
    }
}
