//! Two-level expectation resolution properties.

use ormtest_harness::expectation::ModeEntry;
use ormtest_harness::{
    ConditionalError, ExpectationError, ExpectationTable, Provider, ProviderTable,
    ReferentialIntegrity,
};
use proptest::prelude::*;
use proptest::sample::{select, subsequence};

fn entry(mode: ReferentialIntegrity, provider: Provider) -> String {
    format!("{mode}/{provider}")
}

/// Table with a per-provider entry for each of `providers` under each mode.
fn dense_table(providers: &[Provider]) -> ExpectationTable {
    ReferentialIntegrity::ALL
        .into_iter()
        .fold(ExpectationTable::by_mode("dense"), |table, mode| {
            let per_provider: ProviderTable = providers
                .iter()
                .map(|provider| (*provider, entry(mode, *provider)))
                .collect();
            table.mode(mode, per_provider)
        })
}

proptest! {
    #[test]
    fn resolution_returns_exactly_the_addressed_entry(
        providers in subsequence(Provider::ALL.to_vec(), 1..=6),
        mode in select(ReferentialIntegrity::ALL.to_vec()),
        pick in any::<prop::sample::Index>(),
    ) {
        let provider = *pick.get(&providers);
        let table = dense_table(&providers);
        let resolved = ConditionalError::new()
            .with_provider(provider)
            .with_referential_integrity(mode)
            .snapshot(&table);
        prop_assert_eq!(resolved, Ok(entry(mode, provider)));
    }

    #[test]
    fn absent_provider_is_a_coverage_gap_never_a_value(
        providers in subsequence(Provider::ALL.to_vec(), 0..6),
        mode in select(ReferentialIntegrity::ALL.to_vec()),
    ) {
        let table = dense_table(&providers);
        for provider in Provider::ALL.into_iter().filter(|p| !providers.contains(p)) {
            let err = ConditionalError::new()
                .with_provider(provider)
                .with_referential_integrity(mode)
                .snapshot(&table)
                .expect_err("provider has no entry");
            prop_assert!(!err.is_authoring());
            prop_assert_eq!(
                err,
                ExpectationError::MissingProvider {
                    table: "dense".to_owned(),
                    mode: Some(mode),
                    provider,
                }
            );
        }
    }
}

#[test]
fn prisma_mode_uniform_entry_ignores_provider() {
    let table: ExpectationTable = ExpectationTable::by_mode("update parent id")
        .mode(
            ReferentialIntegrity::ForeignKeys,
            ProviderTable::new()
                .with(Provider::Postgresql, "FK failed: userId")
                .with(Provider::Mysql, "FK failed: userId"),
        )
        .uniform(ReferentialIntegrity::Prisma, "relation violated");

    for provider in Provider::ALL {
        let resolved = ConditionalError::new()
            .with_provider(provider)
            .with_referential_integrity(ReferentialIntegrity::Prisma)
            .snapshot(&table);
        assert_eq!(resolved.as_deref(), Ok("relation violated"), "provider={provider}");
    }
}

#[test]
fn absent_mode_fails_at_selection_before_provider_lookup() {
    let table: ExpectationTable = ExpectationTable::by_mode("fk only")
        .mode(ReferentialIntegrity::ForeignKeys, ProviderTable::new().with_default("x"));
    let resolver = ConditionalError::new()
        .with_provider(Provider::Mysql)
        .with_referential_integrity(ReferentialIntegrity::Prisma);

    let err = resolver.select_mode(&table).expect_err("no prisma entry");
    assert!(err.is_authoring());
    assert_eq!(err.table(), "fk only");
    assert_eq!(table.modes(), vec![ReferentialIntegrity::ForeignKeys]);
}

#[test]
fn mode_selection_defers_provider_lookup() {
    let table: ExpectationTable = ExpectationTable::by_mode("deferred").mode(
        ReferentialIntegrity::ForeignKeys,
        ProviderTable::new().with(Provider::Sqlite, "Foreign key constraint failed on the field: `foreign key`"),
    );
    let selection = ConditionalError::new()
        .with_provider(Provider::Sqlserver)
        .select_mode(&table)
        .expect("foreignKeys present");
    assert_eq!(selection.mode(), Some(ReferentialIntegrity::ForeignKeys));
    assert!(matches!(
        selection.resolve(),
        Err(ExpectationError::MissingProvider { provider: Provider::Sqlserver, .. })
    ));
}

#[test]
fn mode_entries_are_constructible_directly() {
    let entry: ModeEntry = ModeEntry::Uniform("relation violated".to_owned());
    assert!(matches!(entry, ModeEntry::Uniform(ref message) if message == "relation violated"));
}
