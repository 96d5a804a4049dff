//! Schema migrations for stored notification settings.

use crate::errors::NotificationResult;
use crate::repository::SettingsRepository;
use crate::types::{GroupSettings, NotificationRelationship};

/// Version written after all migrations have run.
pub const CURRENT_SETTINGS_VERSION: i64 = 2;

/// Brings stored settings up to [`CURRENT_SETTINGS_VERSION`]. Returns the version found.
pub fn migrate(repository: &SettingsRepository) -> NotificationResult<i64> {
    let found = repository.get_settings_version();
    let mut version = found;

    while version < CURRENT_SETTINGS_VERSION {
        if version == 1 {
            migrate_v1_to_v2(repository)?;
        }
        version += 1;
        repository.set_settings_version(version)?;
        log::info!("Notifications: settings migrated to version {}", version);
    }

    if found > CURRENT_SETTINGS_VERSION {
        log::warn!(
            "Notifications: stored settings version {} is newer than supported {}",
            found,
            CURRENT_SETTINGS_VERSION
        );
    }

    Ok(found)
}

/// Legacy records subscribed immediately and never recorded confirmation.
///
/// Enabled owners are re-queued so reconciliation re-issues their
/// subscriptions. Muted owners and watchers are marked finished so they stay
/// unsubscribed.
fn migrate_v1_to_v2(repository: &SettingsRepository) -> NotificationResult<()> {
    let migrated = repository.update(|settings| {
        for wallet in settings.iter_mut() {
            wallet.successfully_finished_initial_subscription =
                wallet.relationship == NotificationRelationship::Watcher || !wallet.enabled;
        }
        settings.len()
    })?;

    let groups = repository.get_group_settings();
    if !groups.is_empty() && groups.get(NotificationRelationship::Watcher).is_none() {
        repository.set_group_settings(
            &GroupSettings::new().with(NotificationRelationship::Watcher, false),
        )?;
    }

    log::debug!("Notifications: v1 -> v2 migrated {} wallet records", migrated);
    Ok(())
}
