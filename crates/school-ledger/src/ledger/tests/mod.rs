mod common;
mod discounts;
