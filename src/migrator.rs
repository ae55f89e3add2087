use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_lots_table::Migration),
            Box::new(m20250301_000002_create_stock_table::Migration),
            Box::new(m20250301_000003_create_stock_movements_table::Migration),
            Box::new(m20250301_000004_create_stock_reservations_table::Migration),
            Box::new(m20250301_000005_create_inventory_counts_tables::Migration),
            Box::new(m20250301_000006_create_sequences_table::Migration),
        ]
    }
}

// Migration implementations

mod m20250301_000001_create_lots_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000001_create_lots_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Lots::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Lots::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Lots::LotNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Lots::MaterialId).uuid().not_null())
                        .col(ColumnDef::new(Lots::SupplierId).uuid().null())
                        .col(ColumnDef::new(Lots::SupplierLotNumber).string().null())
                        .col(ColumnDef::new(Lots::ManufacturedDate).date().null())
                        .col(ColumnDef::new(Lots::ExpiryDate).date().not_null())
                        .col(ColumnDef::new(Lots::ReceivedDate).date().not_null())
                        .col(ColumnDef::new(Lots::Status).string().not_null())
                        .col(ColumnDef::new(Lots::QcStatus).string().not_null())
                        .col(ColumnDef::new(Lots::LastExpiryAlertDays).integer().null())
                        .col(ColumnDef::new(Lots::Notes).string().null())
                        .col(
                            ColumnDef::new(Lots::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Lots::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_lots_material_id")
                        .table(Lots::Table)
                        .col(Lots::MaterialId)
                        .to_owned(),
                )
                .await?;

            // FEFO scans read (material_id, expiry_date) together
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_lots_material_expiry")
                        .table(Lots::Table)
                        .col(Lots::MaterialId)
                        .col(Lots::ExpiryDate)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_lots_expiry_date")
                        .table(Lots::Table)
                        .col(Lots::ExpiryDate)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Lots::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Lots {
        Table,
        Id,
        LotNumber,
        MaterialId,
        SupplierId,
        SupplierLotNumber,
        ManufacturedDate,
        ExpiryDate,
        ReceivedDate,
        Status,
        QcStatus,
        LastExpiryAlertDays,
        Notes,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000002_create_stock_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000002_create_stock_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Stock::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Stock::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Stock::WarehouseId).uuid().not_null())
                        .col(ColumnDef::new(Stock::ZoneId).uuid().not_null())
                        .col(ColumnDef::new(Stock::LocationId).uuid().not_null())
                        .col(ColumnDef::new(Stock::MaterialId).uuid().not_null())
                        .col(ColumnDef::new(Stock::LotId).uuid().null())
                        .col(
                            ColumnDef::new(Stock::Quantity)
                                .decimal_len(15, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Stock::ReservedQty)
                                .decimal_len(15, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Stock::UnitId).uuid().not_null())
                        .col(
                            ColumnDef::new(Stock::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Stock::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One ledger row per (location, material, lot)
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_stock_location_material_lot")
                        .table(Stock::Table)
                        .col(Stock::LocationId)
                        .col(Stock::MaterialId)
                        .col(Stock::LotId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_material_id")
                        .table(Stock::Table)
                        .col(Stock::MaterialId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_lot_id")
                        .table(Stock::Table)
                        .col(Stock::LotId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Stock::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Stock {
        Table,
        Id,
        WarehouseId,
        ZoneId,
        LocationId,
        MaterialId,
        LotId,
        Quantity,
        ReservedQty,
        UnitId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000003_create_stock_movements_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000003_create_stock_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::MovementNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::MovementType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::ReferenceType)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::ReferenceId).uuid().null())
                        .col(ColumnDef::new(StockMovements::MaterialId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::LotId).uuid().null())
                        .col(ColumnDef::new(StockMovements::FromLocationId).uuid().null())
                        .col(ColumnDef::new(StockMovements::ToLocationId).uuid().null())
                        .col(
                            ColumnDef::new(StockMovements::Quantity)
                                .decimal_len(15, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::UnitId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::Notes).string().null())
                        .col(ColumnDef::new(StockMovements::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(StockMovements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_material_id")
                        .table(StockMovements::Table)
                        .col(StockMovements::MaterialId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_lot_id")
                        .table(StockMovements::Table)
                        .col(StockMovements::LotId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_reference")
                        .table(StockMovements::Table)
                        .col(StockMovements::ReferenceType)
                        .col(StockMovements::ReferenceId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum StockMovements {
        Table,
        Id,
        MovementNumber,
        MovementType,
        ReferenceType,
        ReferenceId,
        MaterialId,
        LotId,
        FromLocationId,
        ToLocationId,
        Quantity,
        UnitId,
        Notes,
        CreatedBy,
        CreatedAt,
    }
}

mod m20250301_000004_create_stock_reservations_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000004_create_stock_reservations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockReservations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockReservations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::MaterialId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::Quantity)
                                .decimal_len(15, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockReservations::UnitId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockReservations::ReservationType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::ReferenceId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::ReferenceNumber)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockReservations::Status).string().not_null())
                        .col(
                            ColumnDef::new(StockReservations::ExpiresAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::CreatedBy)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockReservations::ReleasedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_reservations_material_status")
                        .table(StockReservations::Table)
                        .col(StockReservations::MaterialId)
                        .col(StockReservations::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_reservations_expires_at")
                        .table(StockReservations::Table)
                        .col(StockReservations::ExpiresAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockReservations::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum StockReservations {
        Table,
        Id,
        MaterialId,
        Quantity,
        UnitId,
        ReservationType,
        ReferenceId,
        ReferenceNumber,
        Status,
        ExpiresAt,
        CreatedBy,
        CreatedAt,
        ReleasedAt,
    }
}

mod m20250301_000005_create_inventory_counts_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000005_create_inventory_counts_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryCounts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryCounts::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryCounts::CountNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(InventoryCounts::CountDate).date().not_null())
                        .col(
                            ColumnDef::new(InventoryCounts::CountType)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryCounts::WarehouseId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryCounts::ZoneId).uuid().null())
                        .col(ColumnDef::new(InventoryCounts::Status).string().not_null())
                        .col(ColumnDef::new(InventoryCounts::Notes).string().null())
                        .col(
                            ColumnDef::new(InventoryCounts::StartedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InventoryCounts::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(InventoryCounts::CreatedBy).uuid().not_null())
                        .col(ColumnDef::new(InventoryCounts::ApprovedBy).uuid().null())
                        .col(
                            ColumnDef::new(InventoryCounts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryCounts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InventoryCountLineItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryCountLineItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryCountLineItems::InventoryCountId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryCountLineItems::LocationId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryCountLineItems::MaterialId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryCountLineItems::LotId).uuid().null())
                        .col(
                            ColumnDef::new(InventoryCountLineItems::UnitId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryCountLineItems::SystemQty)
                                .decimal_len(15, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryCountLineItems::CountedQty)
                                .decimal_len(15, 4)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InventoryCountLineItems::Variance)
                                .decimal_len(15, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryCountLineItems::IsCounted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(InventoryCountLineItems::CountedBy)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InventoryCountLineItems::CountedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(InventoryCountLineItems::Notes).string().null())
                        .col(
                            ColumnDef::new(InventoryCountLineItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_count_line_items_count_id")
                        .table(InventoryCountLineItems::Table)
                        .col(InventoryCountLineItems::InventoryCountId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(
                    Table::drop()
                        .table(InventoryCountLineItems::Table)
                        .to_owned(),
                )
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryCounts::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum InventoryCounts {
        Table,
        Id,
        CountNumber,
        CountDate,
        CountType,
        WarehouseId,
        ZoneId,
        Status,
        Notes,
        StartedAt,
        CompletedAt,
        CreatedBy,
        ApprovedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(Iden)]
    enum InventoryCountLineItems {
        Table,
        Id,
        InventoryCountId,
        LocationId,
        MaterialId,
        LotId,
        UnitId,
        SystemQty,
        CountedQty,
        Variance,
        IsCounted,
        CountedBy,
        CountedAt,
        Notes,
        CreatedAt,
    }
}

mod m20250301_000006_create_sequences_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000006_create_sequences_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Per-period document number counters, bumped with an atomic
            // UPDATE inside the owning transaction.
            manager
                .create_table(
                    Table::create()
                        .table(Sequences::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Sequences::Name)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Sequences::Value)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Sequences::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Sequences {
        Table,
        Name,
        Value,
    }
}
