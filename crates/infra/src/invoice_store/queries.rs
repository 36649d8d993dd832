//! SQL statements issued by the Postgres invoice store.
//!
//! Values are always bound positionally; nothing is spliced into the text.

pub const INSERT_INVOICE: &str = r#"
    INSERT INTO factura (cliente, fecha, state)
    VALUES ($1, $2, 1)
    RETURNING id
"#;

pub const INSERT_LINE_ITEM: &str = r#"
    INSERT INTO facturadetalle (facturaid, producto, cantidad, precio)
    VALUES ($1, $2, $3, $4)
"#;

pub const UPDATE_INVOICE: &str = r#"
    UPDATE factura
    SET cliente = $1, fecha = $2
    WHERE id = $3
"#;

pub const DELETE_LINE_ITEM: &str = "DELETE FROM facturadetalle WHERE id = $1";

pub const UPDATE_LINE_ITEM: &str = r#"
    UPDATE facturadetalle
    SET producto = $1, cantidad = $2, precio = $3
    WHERE id = $4
"#;

// No ORDER BY: callers must not rely on item order.
pub const SELECT_ITEMS_FOR_INVOICE: &str = r#"
    SELECT
        id,
        facturaid,
        producto,
        cantidad,
        precio,
        cantidad * precio AS total
    FROM facturadetalle
    WHERE facturaid = $1
"#;

pub const VOID_INVOICE: &str = "UPDATE factura SET state = 0 WHERE id = $1";

pub const SELECT_INVOICE: &str = r#"
    SELECT id, cliente, fecha, state
    FROM factura
    WHERE id = $1
"#;

pub const LIST_INVOICES: &str = r#"
    SELECT id, cliente, fecha, state
    FROM factura
    WHERE ($1::integer IS NULL OR state = $1)
    ORDER BY id ASC
"#;
