//! HTML rendering of a single order.
//!
//! Every value that came from the wire or the store is escaped.

use std::fmt::Write;

use orderflow_core::Order;

/// Escape the five HTML-significant characters.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn row(out: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = write!(
        out,
        "<tr><th>{}</th><td>{}</td></tr>",
        label,
        escape_html(&value.to_string())
    );
}

/// Render the order page. Items are numbered from 1 in display order.
pub fn render_order_page(order: &Order) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\">");
    let _ = write!(out, "<title>Order {}</title>", escape_html(&order.order_uid));
    out.push_str("</head>\n<body>\n");

    let _ = write!(out, "<h1>Order {}</h1>\n<table>", escape_html(&order.order_uid));
    row(&mut out, "Track number", &order.track_number);
    row(&mut out, "Entry", &order.entry);
    row(&mut out, "Locale", &order.locale);
    row(&mut out, "Customer", &order.customer_id);
    row(&mut out, "Delivery service", &order.delivery_service);
    row(&mut out, "Created", &order.date_created);
    out.push_str("</table>\n");

    let d = &order.delivery;
    out.push_str("<h2>Delivery</h2>\n<table>");
    row(&mut out, "Name", &d.name);
    row(&mut out, "Phone", &d.phone);
    row(&mut out, "Zip", &d.zip);
    row(&mut out, "City", &d.city);
    row(&mut out, "Address", &d.address);
    row(&mut out, "Region", &d.region);
    row(&mut out, "Email", &d.email);
    out.push_str("</table>\n");

    let p = &order.payment;
    out.push_str("<h2>Payment</h2>\n<table>");
    row(&mut out, "Transaction", &p.transaction);
    row(&mut out, "Currency", &p.currency);
    row(&mut out, "Provider", &p.provider);
    row(&mut out, "Amount", p.amount);
    row(&mut out, "Bank", &p.bank);
    row(&mut out, "Delivery cost", p.delivery_cost);
    row(&mut out, "Goods total", p.goods_total);
    row(&mut out, "Custom fee", p.custom_fee);
    out.push_str("</table>\n");

    out.push_str("<h2>Items</h2>\n<table>\n<tr><th>#</th><th>Name</th><th>Brand</th><th>Size</th><th>Price</th><th>Sale</th><th>Total</th></tr>\n");
    for (n, item) in order.items.iter().enumerate() {
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            n + 1,
            escape_html(&item.name),
            escape_html(&item.brand),
            escape_html(&item.size),
            item.price,
            item.sale,
            item.total_price,
        );
    }
    out.push_str("</table>\n</body>\n</html>\n");
    out
}
